use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("buffer pool exhausted: no free frame and no evictable victim")]
    BufferExhausted,

    #[error("page {0} is not resident")]
    PageNotResident(PageId),

    #[error("page {0} is pinned")]
    PagePinned(PageId),

    #[error("page {0} was not pinned")]
    PageNotPinned(PageId),

    #[error("disk manager error: {0}")]
    Disk(#[from] DiskManagerError),
}
