use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::instance::BufferPoolInstance;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::disk::DiskManager;

/// Sharded buffer pool: `num_instances` independent instances, each owning
/// the page ids congruent to its index. Operations on an existing page are
/// routed by `page_id % num_instances`; this front-end takes no locks of its
/// own and relies entirely on instance latches.
pub struct ParallelBufferPool {
    instances: Vec<Arc<BufferPoolInstance>>,
    start_index: AtomicUsize,
}

impl ParallelBufferPool {
    pub fn new(num_instances: usize, pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolInstance::new_sharded(
                    pool_size,
                    num_instances,
                    i,
                    disk_manager.clone(),
                ))
            })
            .collect();
        Self {
            instances,
            start_index: AtomicUsize::new(0),
        }
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn instance(&self, index: usize) -> &Arc<BufferPoolInstance> {
        &self.instances[index]
    }

    fn instance_for(&self, page_id: PageId) -> &Arc<BufferPoolInstance> {
        let index = page_id.rem_euclid(self.instances.len() as PageId) as usize;
        &self.instances[index]
    }
}

impl BufferPoolManager for ParallelBufferPool {
    /// Round-robin allocation: walk the instances starting at a rotating
    /// cursor and take the first one with a frame to spare. The cursor
    /// advances once per attempt so successive callers start at different
    /// instances.
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        for _ in 0..self.instances.len() {
            let index = self.start_index.fetch_add(1, Ordering::SeqCst) % self.instances.len();
            match self.instances[index].new_page() {
                Ok(result) => return Ok(result),
                Err(BufferPoolError::BufferExhausted) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BufferPoolError::BufferExhausted)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).flush_page(page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).delete_page(page_id)
    }

    fn pool_size(&self) -> usize {
        self.instances.len() * self.instances[0].pool_size()
    }
}
