use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::disk::DiskManager;

/// Per-frame bookkeeping. The page contents hang off a shared pointer so
/// callers can latch and mutate the page after the pool mutex is released;
/// the pin count is what keeps the frame from being re-targeted underneath
/// them.
struct Frame {
    page: PagePtr,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// One buffer pool instance: a fixed array of frames, a free list, a
/// page-id-to-frame map and an LRU replacer. All public operations take the
/// instance mutex; disk I/O happens under it.
///
/// Page ids are allocated stickily: `next_page_id` starts at
/// `instance_index` and advances by `num_instances`, so every page this
/// instance ever owns satisfies `page_id % num_instances == instance_index`.
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: usize,
    instance_index: usize,
    state: Mutex<PoolState>,
    replacer: LruReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolInstance {
    /// Stand-alone pool: one instance owning every page id.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::new_sharded(pool_size, 1, 0, disk_manager)
    }

    /// One shard of a parallel pool.
    pub fn new_sharded(
        pool_size: usize,
        num_instances: usize,
        instance_index: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(Frame {
                page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::new(),
                free_list,
                next_page_id: instance_index as PageId,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_manager,
        }
    }

    pub fn instance_index(&self) -> usize {
        self.instance_index
    }

    /// Page ids currently mapped to a frame. Used by integrity checks.
    pub fn resident_pages(&self) -> Vec<PageId> {
        self.state.lock().page_table.keys().copied().collect()
    }

    /// Grab a usable frame: free list first, then an LRU victim whose old
    /// page is flushed (if dirty) and unmapped.
    fn find_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }
        let frame_id = self.replacer.victim().ok_or(BufferPoolError::BufferExhausted)?;

        let old_page_id = state.frames[frame_id].page.read().page_id;
        self.flush_frame(state, frame_id)?;
        state.page_table.remove(&old_page_id);
        debug!(
            "buffer pool {}/{}: evicted page {} from frame {}",
            self.instance_index, self.num_instances, old_page_id, frame_id
        );
        Ok(frame_id)
    }

    /// Write the frame's page out if dirty and clear the dirty bit.
    fn flush_frame(&self, state: &mut PoolState, frame_id: FrameId) -> Result<(), BufferPoolError> {
        if state.frames[frame_id].is_dirty {
            let page = state.frames[frame_id].page.read();
            self.disk_manager.write_page(&page)?;
            drop(page);
            state.frames[frame_id].is_dirty = false;
        }
        Ok(())
    }

    fn allocate_page_id(&self, state: &mut PoolState) -> PageId {
        let page_id = state.next_page_id;
        state.next_page_id += self.num_instances as PageId;
        debug_assert_eq!(
            page_id as usize % self.num_instances,
            self.instance_index,
            "allocated page ids must shard back to this instance"
        );
        page_id
    }
}

impl BufferPoolManager for BufferPoolInstance {
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = self.find_frame(&mut state)?;
        let page_id = self.allocate_page_id(&mut state);

        {
            let mut page = state.frames[frame_id].page.write();
            page.reset();
            page.page_id = page_id;
        }
        state.frames[frame_id].pin_count = 1;
        state.frames[frame_id].is_dirty = false;
        state.page_table.insert(page_id, frame_id);

        Ok((state.frames[frame_id].page.clone(), page_id))
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            if state.frames[frame_id].pin_count == 0 {
                self.replacer.pin(frame_id);
            }
            state.frames[frame_id].pin_count += 1;
            return Ok(state.frames[frame_id].page.clone());
        }

        let frame_id = self.find_frame(&mut state)?;
        {
            let mut page = state.frames[frame_id].page.write();
            page.reset();
            self.disk_manager.read_page(page_id, &mut page)?;
        }
        state.frames[frame_id].pin_count = 1;
        state.frames[frame_id].is_dirty = false;
        state.page_table.insert(page_id, frame_id);

        Ok(state.frames[frame_id].page.clone())
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            // already evicted or deleted, nothing to do
            return Ok(());
        };

        let frame = &mut state.frames[frame_id];
        frame.is_dirty |= is_dirty;
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
        Ok(())
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Err(BufferPoolError::PageNotResident(page_id));
        };
        self.flush_frame(&mut state, frame_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_ids: Vec<FrameId> = state.page_table.values().copied().collect();
        for frame_id in frame_ids {
            self.flush_frame(&mut state, frame_id)?;
        }
        Ok(())
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(());
        };
        if state.frames[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        self.flush_frame(&mut state, frame_id)?;
        self.replacer.pin(frame_id);
        state.page_table.remove(&page_id);
        state.frames[frame_id].page.write().reset();
        state.frames[frame_id].pin_count = 0;
        state.frames[frame_id].is_dirty = false;
        state.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    fn pool_size(&self) -> usize {
        self.pool_size
    }
}
