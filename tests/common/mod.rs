use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use stratusdb::storage::buffer::{BufferPoolInstance, ParallelBufferPool};
use stratusdb::storage::disk::DiskManager;

// Create a disk manager over a temporary database file
#[allow(dead_code)]
pub fn create_temp_disk_manager() -> Result<(Arc<DiskManager>, NamedTempFile)> {
    let file = NamedTempFile::new()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);
    Ok((disk_manager, file))
}

// Create a single buffer pool instance with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
) -> Result<(Arc<BufferPoolInstance>, Arc<DiskManager>, NamedTempFile)> {
    let (disk_manager, file) = create_temp_disk_manager()?;
    let buffer_pool = Arc::new(BufferPoolInstance::new(pool_size, disk_manager.clone()));
    Ok((buffer_pool, disk_manager, file))
}

// Create a sharded buffer pool with a temporary database
#[allow(dead_code)]
pub fn create_parallel_pool(
    num_instances: usize,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPool>, Arc<DiskManager>, NamedTempFile)> {
    let (disk_manager, file) = create_temp_disk_manager()?;
    let buffer_pool = Arc::new(ParallelBufferPool::new(
        num_instances,
        pool_size,
        disk_manager.clone(),
    ));
    Ok((buffer_pool, disk_manager, file))
}
