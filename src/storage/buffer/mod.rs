pub mod error;
pub mod instance;
pub mod parallel;
pub mod replacer;

use crate::common::types::{PageId, PagePtr};

pub use error::BufferPoolError;
pub use instance::BufferPoolInstance;
pub use parallel::ParallelBufferPool;
pub use replacer::LruReplacer;

/// The executor-facing buffer pool contract. Both the single instance and
/// the sharded front-end implement it, so clients like the hash index can
/// run over either.
pub trait BufferPoolManager: Send + Sync {
    /// Allocate a fresh page, pinned on behalf of the caller.
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError>;

    /// Pin an existing page, reading it from disk if not resident.
    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError>;

    /// Drop one pin, OR-ing the dirty flag into the frame.
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError>;

    /// Write the page out if dirty.
    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;

    /// Write out every resident dirty page.
    fn flush_all_pages(&self) -> Result<(), BufferPoolError>;

    /// Drop an unpinned page from the pool and mark it freeable on disk.
    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;

    /// Total number of frames.
    fn pool_size(&self) -> usize;
}
