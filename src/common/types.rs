use std::fmt;
use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Default number of frames in a buffer pool instance
pub const BUFFER_POOL_SIZE: usize = 10;

/// Page ID type
pub type PageId = i32;

/// Transaction ID type
pub type TxnId = i32;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// LSN (Log Sequence Number) type
pub type Lsn = i32;

/// Slot index within a page
pub type SlotNum = u32;

pub const INVALID_PAGE_ID: PageId = -1;
pub const INVALID_TXN_ID: TxnId = -1;
pub const INVALID_LSN: Lsn = -1;

/// Record identifier: the page a tuple lives on plus its slot. The unit
/// of row locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: SlotNum,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: SlotNum) -> Self {
        Self { page_id, slot_num }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_num)
    }
}

/// Page structure: a fixed-size buffer of raw bytes plus identity metadata.
/// Pin counts and dirty flags live in the owning frame, not here.
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the data buffer and drop the page identity. A reset frame must
    /// read as all-zero so overlay pages see deterministic bitmaps.
    pub fn reset(&mut self) {
        self.data = [0; PAGE_SIZE];
        self.page_id = INVALID_PAGE_ID;
        self.lsn = 0;
    }
}

/// Smart pointer to a page. The RwLock doubles as the page's readers/writer
/// latch for clients; the buffer pool itself never takes it for bookkeeping.
pub type PagePtr = Arc<RwLock<Page>>;
