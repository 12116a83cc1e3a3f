use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual disk I/O: a byte-addressable
/// store of fixed-size pages keyed by page id.
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicI32,
    free_pages: Mutex<HashSet<PageId>>,
}

impl DiskManager {
    /// Open (or create) the database file backing this manager.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let file_size = file.metadata()?.len();
        let next_page_id = (file_size / PAGE_SIZE as u64) as PageId;

        Ok(Self {
            db_file: Mutex::new(file),
            next_page_id: AtomicI32::new(next_page_id),
            free_pages: Mutex::new(HashSet::new()),
        })
    }

    /// Read a page from disk. Reading past the end of the file yields an
    /// all-zero page, so freshly allocated ids are readable before their
    /// first write.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();
            let file_size = file.metadata()?.len();

            if offset >= file_size {
                page.reset();
                page.page_id = page_id;
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buffer)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk at its id's offset, extending the file if needed.
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = page.page_id as u64 * PAGE_SIZE as u64;

        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();
        if offset > file_size {
            // pad the gap so page offsets stay addressable
            file.set_len(offset)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Hand out the next monotonically increasing page id. Sharded buffer
    /// pools allocate their own sticky ids instead and never call this.
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Record a page as freeable. Reuse is not guaranteed; the id simply
    /// stops being live from the caller's point of view.
    pub fn deallocate_page(&self, page_id: PageId) {
        self.free_pages.lock().insert(page_id);
    }

    /// Whether a page id has been deallocated and not reused.
    pub fn is_deallocated(&self, page_id: PageId) -> bool {
        self.free_pages.lock().contains(&page_id)
    }
}
