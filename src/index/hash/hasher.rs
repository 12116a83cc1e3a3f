use std::hash::{BuildHasher, Hash, Hasher};

use ahash::RandomState;

/// Hash function plugged into the extendible hash table. The 32-bit output
/// feeds the directory mask, so implementations must be deterministic for
/// the lifetime of the table's on-disk state.
pub trait KeyHasher<K>: Send + Sync {
    fn hash_key(&self, key: &K) -> u32;
}

/// Default hasher: ahash with pinned seeds. Seeding is fixed because hash
/// values decide on-disk bucket placement and must survive restarts.
pub struct DefaultKeyHasher {
    state: RandomState,
}

impl DefaultKeyHasher {
    pub fn new() -> Self {
        Self {
            state: RandomState::with_seeds(
                0x243f_6a88_85a3_08d3,
                0x1319_8a2e_0370_7344,
                0xa409_3822_299f_31d0,
                0x082e_fa98_ec4e_6c89,
            ),
        }
    }
}

impl Default for DefaultKeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash> KeyHasher<K> for DefaultKeyHasher {
    fn hash_key(&self, key: &K) -> u32 {
        let mut hasher = self.state.build_hasher();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }
}

/// Identity hash for integer keys. Gives fully predictable bucket
/// placement, which bulk loads and tests rely on.
pub struct IdentityKeyHasher;

impl KeyHasher<i32> for IdentityKeyHasher {
    fn hash_key(&self, key: &i32) -> u32 {
        *key as u32
    }
}

impl KeyHasher<u32> for IdentityKeyHasher {
    fn hash_key(&self, key: &u32) -> u32 {
        *key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hasher_is_stable() {
        let a = DefaultKeyHasher::new();
        let b = DefaultKeyHasher::new();
        for key in [0i32, 1, -1, 42, i32::MAX] {
            assert_eq!(a.hash_key(&key), b.hash_key(&key));
        }
    }

    #[test]
    fn test_identity_hasher() {
        assert_eq!(IdentityKeyHasher.hash_key(&7i32), 7);
        assert_eq!(IdentityKeyHasher.hash_key(&0x1234u32), 0x1234);
    }
}
