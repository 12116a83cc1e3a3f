use std::marker::PhantomData;

use crate::common::types::PAGE_SIZE;
use crate::storage::page::codec::Storable;

/// Number of (key, value) slots in a bucket page. Each slot costs its
/// encoded size plus two bits (occupied, readable), which gives the
/// bits-plus-entries equation below.
pub fn bucket_array_size<K: Storable, V: Storable>() -> usize {
    (4 * PAGE_SIZE - 8) / (4 * (K::SIZE + V::SIZE) + 1)
}

fn bitmap_len(slots: usize) -> usize {
    (slots + 7) / 8
}

/// View of a hash bucket laid over a page's byte buffer: an `occupied`
/// bitmap, a `readable` bitmap, then the packed slot array.
///
/// A slot is live iff both bits are set; occupied-but-not-readable is a
/// tombstone. Probe loops stop at the first non-occupied slot, so the
/// occupied prefix acts as the scan horizon.
pub struct HashTableBucketPage<B, K, V> {
    buf: B,
    slots: usize,
    _marker: PhantomData<(K, V)>,
}

impl<B: AsRef<[u8]>, K: Storable, V: Storable> HashTableBucketPage<B, K, V> {
    pub fn new(buf: B) -> Self {
        let slots = bucket_array_size::<K, V>();
        debug_assert!(2 * bitmap_len(slots) + slots * (K::SIZE + V::SIZE) <= PAGE_SIZE);
        Self {
            buf,
            slots,
            _marker: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots
    }

    fn slot_offset(&self, index: usize) -> usize {
        2 * bitmap_len(self.slots) + index * (K::SIZE + V::SIZE)
    }

    fn bit(&self, bitmap_start: usize, index: usize) -> bool {
        let byte = self.buf.as_ref()[bitmap_start + index / 8];
        byte & (0x80 >> (index % 8)) != 0
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        self.bit(0, index)
    }

    pub fn is_readable(&self, index: usize) -> bool {
        self.bit(bitmap_len(self.slots), index)
    }

    pub fn key_at(&self, index: usize) -> K {
        K::read_from(&self.buf.as_ref()[self.slot_offset(index)..])
    }

    pub fn value_at(&self, index: usize) -> V {
        V::read_from(&self.buf.as_ref()[self.slot_offset(index) + K::SIZE..])
    }

    /// Collect every live value stored under `key`.
    pub fn get_value(&self, key: &K) -> Vec<V> {
        let mut result = Vec::new();
        for i in 0..self.slots {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) && self.key_at(i) == *key {
                result.push(self.value_at(i));
            }
        }
        result
    }

    /// Full means no insertable slot: every slot is live.
    pub fn is_full(&self) -> bool {
        (0..self.slots).all(|i| self.is_occupied(i) && self.is_readable(i))
    }

    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }

    pub fn num_readable(&self) -> usize {
        let mut count = 0;
        for i in 0..self.slots {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) {
                count += 1;
            }
        }
        count
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, K: Storable, V: Storable> HashTableBucketPage<B, K, V> {
    fn set_bit(&mut self, bitmap_start: usize, index: usize, value: bool) {
        let byte = &mut self.buf.as_mut()[bitmap_start + index / 8];
        let mask = 0x80u8 >> (index % 8);
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }

    pub fn set_occupied(&mut self, index: usize) {
        self.set_bit(0, index, true);
    }

    pub fn set_readable(&mut self, index: usize) {
        self.set_bit(bitmap_len(self.slots), index, true);
    }

    /// Insert a pair into the first non-live slot. Rejects an exact
    /// duplicate of an existing live pair; returns false when the bucket
    /// has no insertable slot.
    pub fn insert(&mut self, key: &K, value: &V) -> bool {
        for i in 0..self.slots {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) && self.key_at(i) == *key && self.value_at(i) == *value {
                return false;
            }
        }
        for i in 0..self.slots {
            if self.is_occupied(i) && self.is_readable(i) {
                continue;
            }
            let offset = self.slot_offset(i);
            key.write_to(&mut self.buf.as_mut()[offset..]);
            value.write_to(&mut self.buf.as_mut()[offset + K::SIZE..]);
            self.set_occupied(i);
            self.set_readable(i);
            return true;
        }
        false
    }

    /// Remove the live slot holding exactly (key, value), leaving a
    /// tombstone. Returns false when the pair is absent.
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        for i in 0..self.slots {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) && self.key_at(i) == *key && self.value_at(i) == *value {
                self.remove_at(i);
                return true;
            }
        }
        false
    }

    /// Tombstone a slot: clear readable, keep occupied as a scan hint.
    pub fn remove_at(&mut self, index: usize) {
        self.set_bit(bitmap_len(self.slots), index, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::PAGE_SIZE;

    type IntBucket<'a> = HashTableBucketPage<&'a mut [u8], i32, i32>;

    #[test]
    fn test_capacity_matches_equation() {
        assert_eq!(bucket_array_size::<i32, i32>(), 496);
    }

    #[test]
    fn test_insert_get_remove() {
        let mut data = [0u8; PAGE_SIZE];
        let mut bucket = IntBucket::new(&mut data[..]);

        assert!(bucket.insert(&1, &10));
        assert!(bucket.insert(&1, &11));
        assert!(bucket.insert(&2, &20));
        // exact duplicate rejected
        assert!(!bucket.insert(&1, &10));

        assert_eq!(bucket.get_value(&1), vec![10, 11]);
        assert_eq!(bucket.get_value(&2), vec![20]);
        assert_eq!(bucket.get_value(&3), Vec::<i32>::new());
        assert_eq!(bucket.num_readable(), 3);

        assert!(bucket.remove(&1, &10));
        assert!(!bucket.remove(&1, &10));
        assert_eq!(bucket.get_value(&1), vec![11]);
    }

    #[test]
    fn test_tombstone_reuse_and_scan_horizon() {
        let mut data = [0u8; PAGE_SIZE];
        let mut bucket = IntBucket::new(&mut data[..]);

        assert!(bucket.insert(&1, &10));
        assert!(bucket.insert(&2, &20));
        assert!(bucket.insert(&3, &30));
        assert!(bucket.remove(&2, &20));

        // slot 1 is a tombstone: occupied, not readable, still scanned past
        assert!(bucket.is_occupied(1));
        assert!(!bucket.is_readable(1));
        assert_eq!(bucket.get_value(&3), vec![30]);

        // the next insert reuses the tombstone slot
        assert!(bucket.insert(&4, &40));
        assert_eq!(bucket.key_at(1), 4);
        assert_eq!(bucket.get_value(&4), vec![40]);
    }

    #[test]
    fn test_fill_to_capacity() {
        let mut data = [0u8; PAGE_SIZE];
        let mut bucket = IntBucket::new(&mut data[..]);
        let capacity = bucket.capacity() as i32;

        for i in 0..capacity {
            assert!(bucket.insert(&i, &i), "slot {} should be insertable", i);
        }
        assert!(bucket.is_full());
        assert!(!bucket.insert(&capacity, &capacity));

        assert!(bucket.remove(&0, &0));
        assert!(!bucket.is_full());
        assert!(bucket.insert(&capacity, &capacity));
        assert!(bucket.is_full());
    }

    #[test]
    fn test_empty_after_removing_everything() {
        let mut data = [0u8; PAGE_SIZE];
        let mut bucket = IntBucket::new(&mut data[..]);

        for i in 0..8 {
            assert!(bucket.insert(&i, &(i * 2)));
        }
        for i in 0..8 {
            assert!(bucket.remove(&i, &(i * 2)));
        }
        assert!(bucket.is_empty());
        assert_eq!(bucket.num_readable(), 0);
    }
}
