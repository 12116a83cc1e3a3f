use thiserror::Error;

use crate::storage::buffer::BufferPoolError;
use crate::storage::page::DirectoryIntegrityError;

#[derive(Error, Debug)]
pub enum HashTableError {
    #[error("buffer pool error: {0}")]
    Buffer(#[from] BufferPoolError),

    #[error(transparent)]
    Integrity(#[from] DirectoryIntegrityError),
}
