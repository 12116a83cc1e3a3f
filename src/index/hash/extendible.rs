use std::marker::PhantomData;
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;

use crate::common::types::PageId;
use crate::index::hash::error::HashTableError;
use crate::index::hash::hasher::KeyHasher;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::{
    HashTableBucketPage, HashTableDirectoryPage, Storable, MAX_DIRECTORY_DEPTH,
};

/// Disk-backed extendible hash table. The directory and every bucket live
/// on buffer-pool pages; all of them are fetched per operation and unpinned
/// before returning.
///
/// Concurrency: a table-level readers/writer latch (shared for lookups,
/// exclusive for inserts and removes) plus the per-page latch of each
/// bucket touched. Split images are computed with the high bit of the
/// current global depth rather than the bucket's local depth; the directory
/// is re-scanned after each doubling, which keeps bucket assignments
/// consistent with that choice.
pub struct ExtendibleHashTable<K, V, H> {
    name: String,
    buffer_pool: Arc<dyn BufferPoolManager>,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    hasher: H,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, H> ExtendibleHashTable<K, V, H>
where
    K: Storable,
    V: Storable,
    H: KeyHasher<K>,
{
    /// Create an empty table: a directory page at global depth 0 pointing
    /// at a single empty bucket.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<dyn BufferPoolManager>,
        hasher: H,
    ) -> Result<Self, HashTableError> {
        let name = name.into();
        let (dir_page, directory_page_id) = buffer_pool.new_page()?;
        let (_bucket_page, bucket_page_id) = buffer_pool.new_page()?;

        {
            let mut dir_guard = dir_page.write();
            let mut dir = HashTableDirectoryPage::new(&mut dir_guard.data[..]);
            dir.set_page_id(directory_page_id);
            dir.set_bucket_page_id(0, bucket_page_id);
        }
        buffer_pool.unpin_page(bucket_page_id, false)?;
        buffer_pool.unpin_page(directory_page_id, true)?;

        Ok(Self {
            name,
            buffer_pool,
            directory_page_id,
            table_latch: RwLock::new(()),
            hasher,
            _marker: PhantomData,
        })
    }

    fn dir_index<B: AsRef<[u8]>>(&self, dir: &HashTableDirectoryPage<B>, key: &K) -> usize {
        (self.hasher.hash_key(key) & dir.global_depth_mask()) as usize
    }

    /// Collect every value stored under `key`.
    pub fn get_value(&self, key: &K) -> Result<Vec<V>, HashTableError> {
        let _table = self.table_latch.read();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let bucket_page_id = {
            let dir_guard = dir_page.read();
            let dir = HashTableDirectoryPage::new(&dir_guard.data[..]);
            dir.bucket_page_id(self.dir_index(&dir, key))
        };

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let result = {
            let bucket_guard = bucket_page.read();
            HashTableBucketPage::<_, K, V>::new(&bucket_guard.data[..]).get_value(key)
        };

        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(result)
    }

    /// Insert a (key, value) pair, splitting the target bucket (and
    /// doubling the directory when the bucket's local depth has caught up
    /// with the global depth) until it has room.
    ///
    /// Returns `Ok(false)` without inserting when the pair already exists,
    /// when the bucket is saturated with copies of this key (splitting
    /// cannot free a slot), or when a bucket page cannot be allocated.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let _table = self.table_latch.write();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let mut dir_guard = dir_page.write();

        let mut bucket_page_id = {
            let dir = HashTableDirectoryPage::new(&dir_guard.data[..]);
            dir.bucket_page_id(self.dir_index(&dir, key))
        };
        let mut bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;

        loop {
            let mut bucket_guard = bucket_page.write();

            if !HashTableBucketPage::<_, K, V>::new(&bucket_guard.data[..]).is_full() {
                let inserted = HashTableBucketPage::<_, K, V>::new(&mut bucket_guard.data[..])
                    .insert(key, value);
                drop(bucket_guard);
                self.buffer_pool.unpin_page(bucket_page_id, true)?;
                drop(dir_guard);
                self.buffer_pool.unpin_page(self.directory_page_id, true)?;
                return Ok(inserted);
            }

            // a bucket holding nothing but this key cannot be split
            // productively: every slot would rehash to the same place
            let saturated = {
                let bucket = HashTableBucketPage::<_, K, V>::new(&bucket_guard.data[..]);
                (0..bucket.capacity()).all(|i| bucket.key_at(i) == *key)
            };
            if saturated {
                drop(bucket_guard);
                self.buffer_pool.unpin_page(bucket_page_id, true)?;
                drop(dir_guard);
                self.buffer_pool.unpin_page(self.directory_page_id, true)?;
                return Ok(false);
            }

            let mut dir = HashTableDirectoryPage::new(&mut dir_guard.data[..]);
            let bucket_index = self.dir_index(&dir, key);

            if dir.local_depth(bucket_index) == dir.global_depth() {
                if dir.global_depth() == MAX_DIRECTORY_DEPTH {
                    // the directory cannot outgrow its single page
                    drop(dir);
                    drop(bucket_guard);
                    self.buffer_pool.unpin_page(bucket_page_id, true)?;
                    drop(dir_guard);
                    self.buffer_pool.unpin_page(self.directory_page_id, true)?;
                    return Ok(false);
                }
                let old_size = dir.size();
                dir.incr_global_depth();
                for i in 0..old_size {
                    let depth = dir.local_depth(i);
                    let page_id = dir.bucket_page_id(i);
                    dir.set_local_depth(i + old_size, depth);
                    dir.set_bucket_page_id(i + old_size, page_id);
                }
                debug!(
                    "hash table {}: directory doubled to global depth {}",
                    self.name,
                    dir.global_depth()
                );
            }

            let new_bucket_index = dir.split_image_index(bucket_index);
            let (new_bucket_page, new_bucket_page_id) = match self.buffer_pool.new_page() {
                Ok(page) => page,
                Err(BufferPoolError::BufferExhausted) => {
                    drop(dir);
                    drop(bucket_guard);
                    self.buffer_pool.unpin_page(bucket_page_id, true)?;
                    drop(dir_guard);
                    self.buffer_pool.unpin_page(self.directory_page_id, true)?;
                    return Ok(false);
                }
                Err(e) => {
                    drop(dir);
                    drop(bucket_guard);
                    let _ = self.buffer_pool.unpin_page(bucket_page_id, true);
                    drop(dir_guard);
                    let _ = self.buffer_pool.unpin_page(self.directory_page_id, true);
                    return Err(e.into());
                }
            };
            dir.set_bucket_page_id(new_bucket_index, new_bucket_page_id);
            debug!(
                "hash table {}: split bucket {} into slot {} (page {})",
                self.name, bucket_index, new_bucket_index, new_bucket_page_id
            );

            // rehash every live slot of the old bucket; entries whose
            // directory index now lands on the split image move over
            {
                let mut new_guard = new_bucket_page.write();
                let mut old_bucket =
                    HashTableBucketPage::<_, K, V>::new(&mut bucket_guard.data[..]);
                let mut new_bucket = HashTableBucketPage::<_, K, V>::new(&mut new_guard.data[..]);
                for i in 0..old_bucket.capacity() {
                    if !old_bucket.is_occupied(i) {
                        break;
                    }
                    if !old_bucket.is_readable(i) {
                        continue;
                    }
                    let k = old_bucket.key_at(i);
                    let v = old_bucket.value_at(i);
                    if self.dir_index(&dir, &k) == new_bucket_index {
                        new_bucket.insert(&k, &v);
                        old_bucket.remove_at(i);
                    }
                }
            }
            dir.incr_local_depth(new_bucket_index);
            dir.incr_local_depth(bucket_index);

            // keep operating on whichever bucket the key now maps to
            let target = self.dir_index(&dir, key);
            drop(dir);
            drop(bucket_guard);
            if target == new_bucket_index {
                self.buffer_pool.unpin_page(bucket_page_id, true)?;
                bucket_page = new_bucket_page;
                bucket_page_id = new_bucket_page_id;
            } else {
                self.buffer_pool.unpin_page(new_bucket_page_id, true)?;
            }
        }
    }

    /// Remove a (key, value) pair. Emptied buckets are merged into their
    /// split images and the directory shrinks while it can, including the
    /// compaction pass that re-pairs empty buckets exposed by a lower
    /// global depth.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let _table = self.table_latch.write();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let mut dir_guard = dir_page.write();

        let (mut bucket_index, mut bucket_page_id) = {
            let dir = HashTableDirectoryPage::new(&dir_guard.data[..]);
            let index = self.dir_index(&dir, key);
            (index, dir.bucket_page_id(index))
        };
        let mut bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;

        let removed = {
            let mut bucket_guard = bucket_page.write();
            HashTableBucketPage::<_, K, V>::new(&mut bucket_guard.data[..]).remove(key, value)
        };
        if !removed {
            self.buffer_pool.unpin_page(bucket_page_id, true)?;
            drop(dir_guard);
            self.buffer_pool.unpin_page(self.directory_page_id, true)?;
            return Ok(false);
        }

        loop {
            let empty = {
                let bucket_guard = bucket_page.read();
                HashTableBucketPage::<_, K, V>::new(&bucket_guard.data[..]).is_empty()
            };

            let mut dir = HashTableDirectoryPage::new(&mut dir_guard.data[..]);
            if !empty
                || dir.global_depth() == 0
                || dir.local_depth(bucket_index) != dir.global_depth()
            {
                break;
            }
            let split_index = dir.split_image_index(bucket_index);
            let split_page_id = dir.bucket_page_id(split_index);
            if split_page_id == bucket_page_id {
                break;
            }
            if dir.local_depth(bucket_index) != dir.local_depth(split_index) {
                break;
            }

            // fold the empty bucket into its split image and drop its page
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            self.buffer_pool.delete_page(bucket_page_id)?;
            dir.set_bucket_page_id(bucket_index, split_page_id);
            dir.decr_local_depth(split_index);
            dir.decr_local_depth(bucket_index);
            debug!(
                "hash table {}: merged bucket {} into split image {}",
                self.name, bucket_index, split_index
            );

            while dir.can_shrink() {
                dir.decr_global_depth();
                debug!(
                    "hash table {}: directory shrank to global depth {}",
                    self.name,
                    dir.global_depth()
                );
                if dir.global_depth() == 0 {
                    continue;
                }
                // a shrink can surface pairs where one side is empty;
                // fold those too so further shrinks become possible
                let half = 1usize << (dir.global_depth() - 1);
                for idx in 0..half {
                    let image = dir.split_image_index(idx);
                    let page_id_a = dir.bucket_page_id(idx);
                    let page_id_b = dir.bucket_page_id(image);
                    if page_id_a == page_id_b {
                        continue;
                    }
                    let page_a = self.buffer_pool.fetch_page(page_id_a)?;
                    let page_b = self.buffer_pool.fetch_page(page_id_b)?;
                    let (live_a, live_b) = {
                        let guard_a = page_a.read();
                        let guard_b = page_b.read();
                        (
                            HashTableBucketPage::<_, K, V>::new(&guard_a.data[..]).num_readable(),
                            HashTableBucketPage::<_, K, V>::new(&guard_b.data[..]).num_readable(),
                        )
                    };
                    if live_a == 0 {
                        dir.set_bucket_page_id(idx, page_id_b);
                        self.buffer_pool.unpin_page(page_id_a, false)?;
                        self.buffer_pool.delete_page(page_id_a)?;
                        self.buffer_pool.unpin_page(page_id_b, false)?;
                        dir.decr_local_depth(idx);
                        dir.decr_local_depth(image);
                    } else if live_b == 0 {
                        dir.set_bucket_page_id(image, page_id_a);
                        self.buffer_pool.unpin_page(page_id_b, false)?;
                        self.buffer_pool.delete_page(page_id_b)?;
                        self.buffer_pool.unpin_page(page_id_a, false)?;
                        dir.decr_local_depth(idx);
                        dir.decr_local_depth(image);
                    } else {
                        self.buffer_pool.unpin_page(page_id_a, false)?;
                        self.buffer_pool.unpin_page(page_id_b, false)?;
                    }
                }
            }

            // the key's bucket may have moved; re-resolve and loop
            bucket_index = self.dir_index(&dir, key);
            bucket_page_id = dir.bucket_page_id(bucket_index);
            drop(dir);
            bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        }

        self.buffer_pool.unpin_page(bucket_page_id, true)?;
        drop(dir_guard);
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;
        Ok(true)
    }

    /// Snapshot of the directory's global depth.
    pub fn global_depth(&self) -> Result<u32, HashTableError> {
        let _table = self.table_latch.read();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let depth = {
            let dir_guard = dir_page.read();
            HashTableDirectoryPage::new(&dir_guard.data[..]).global_depth()
        };
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(depth)
    }

    /// Check the directory's structural invariants.
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let _table = self.table_latch.read();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let result = {
            let dir_guard = dir_page.read();
            HashTableDirectoryPage::new(&dir_guard.data[..]).verify_integrity()
        };
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        result.map_err(Into::into)
    }
}
