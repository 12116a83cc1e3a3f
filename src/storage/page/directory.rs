use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::common::types::{Lsn, PageId};

/// Directory depth cap: 512 slots keep the directory inside a single page.
pub const MAX_DIRECTORY_DEPTH: u32 = 9;

/// Number of slots physically present in the directory page.
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_DIRECTORY_DEPTH;

// On-disk field offsets. The byte layout is normative: page_id, lsn,
// global_depth, local_depths[512], bucket_page_ids[512].
const PAGE_ID_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const GLOBAL_DEPTH_OFFSET: usize = 8;
const LOCAL_DEPTHS_OFFSET: usize = 12;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

#[derive(Error, Debug)]
#[error("directory integrity violated: {0}")]
pub struct DirectoryIntegrityError(pub String);

/// View of an extendible-hash directory laid over a page's byte buffer.
/// Construct it with `&page.data` for reads or `&mut page.data` for writes;
/// accessors interpret the bytes in place.
pub struct HashTableDirectoryPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> HashTableDirectoryPage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    pub fn page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.buf.as_ref()[PAGE_ID_OFFSET..])
    }

    pub fn lsn(&self) -> Lsn {
        LittleEndian::read_i32(&self.buf.as_ref()[LSN_OFFSET..])
    }

    pub fn global_depth(&self) -> u32 {
        LittleEndian::read_u32(&self.buf.as_ref()[GLOBAL_DEPTH_OFFSET..])
    }

    /// Mask selecting the `global_depth` low bits of a hash.
    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth()) - 1
    }

    /// Number of addressable directory slots.
    pub fn size(&self) -> usize {
        1usize << self.global_depth()
    }

    pub fn local_depth(&self, index: usize) -> u32 {
        self.buf.as_ref()[LOCAL_DEPTHS_OFFSET + index] as u32
    }

    pub fn bucket_page_id(&self, index: usize) -> PageId {
        LittleEndian::read_i32(&self.buf.as_ref()[BUCKET_PAGE_IDS_OFFSET + index * 4..])
    }

    /// The slot sharing a bucket with `index` under the current global
    /// depth: flip the high bit. Splits always pair against this image,
    /// which is why the directory is re-scanned after each doubling.
    pub fn split_image_index(&self, index: usize) -> usize {
        index ^ (1usize << (self.global_depth() - 1))
    }

    /// The directory can halve iff no slot's local depth has reached the
    /// global depth.
    pub fn can_shrink(&self) -> bool {
        (0..self.size()).all(|i| self.local_depth(i) < self.global_depth())
    }

    /// Check the structural invariants: every slot points at a real page,
    /// all slots sharing a page agree on local depth, no local depth
    /// exceeds the global depth, and each bucket is referenced by exactly
    /// `2^(global - local)` slots.
    pub fn verify_integrity(&self) -> Result<(), DirectoryIntegrityError> {
        use std::collections::HashMap;

        let global_depth = self.global_depth();
        let mut ref_counts: HashMap<PageId, usize> = HashMap::new();
        let mut depths: HashMap<PageId, u32> = HashMap::new();

        for i in 0..self.size() {
            let page_id = self.bucket_page_id(i);
            let local_depth = self.local_depth(i);

            if page_id < 0 {
                return Err(DirectoryIntegrityError(format!(
                    "slot {} points at invalid page {}",
                    i, page_id
                )));
            }
            if local_depth > global_depth {
                return Err(DirectoryIntegrityError(format!(
                    "slot {} has local depth {} > global depth {}",
                    i, local_depth, global_depth
                )));
            }
            match depths.insert(page_id, local_depth) {
                Some(previous) if previous != local_depth => {
                    return Err(DirectoryIntegrityError(format!(
                        "page {} referenced with local depths {} and {}",
                        page_id, previous, local_depth
                    )));
                }
                _ => {}
            }
            *ref_counts.entry(page_id).or_insert(0) += 1;
        }

        for (page_id, count) in ref_counts {
            let expected = 1usize << (global_depth - depths[&page_id]);
            if count != expected {
                return Err(DirectoryIntegrityError(format!(
                    "page {} referenced by {} slots, expected {}",
                    page_id, count, expected
                )));
            }
        }
        Ok(())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HashTableDirectoryPage<B> {
    pub fn set_page_id(&mut self, page_id: PageId) {
        LittleEndian::write_i32(&mut self.buf.as_mut()[PAGE_ID_OFFSET..], page_id);
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        LittleEndian::write_i32(&mut self.buf.as_mut()[LSN_OFFSET..], lsn);
    }

    pub fn incr_global_depth(&mut self) {
        let depth = self.global_depth();
        assert!(depth < MAX_DIRECTORY_DEPTH, "directory is at maximum depth");
        LittleEndian::write_u32(&mut self.buf.as_mut()[GLOBAL_DEPTH_OFFSET..], depth + 1);
    }

    pub fn decr_global_depth(&mut self) {
        let depth = self.global_depth();
        assert!(depth > 0, "directory depth underflow");
        LittleEndian::write_u32(&mut self.buf.as_mut()[GLOBAL_DEPTH_OFFSET..], depth - 1);
    }

    pub fn set_local_depth(&mut self, index: usize, depth: u32) {
        self.buf.as_mut()[LOCAL_DEPTHS_OFFSET + index] = depth as u8;
    }

    pub fn incr_local_depth(&mut self, index: usize) {
        let depth = self.local_depth(index);
        self.set_local_depth(index, depth + 1);
    }

    pub fn decr_local_depth(&mut self, index: usize) {
        let depth = self.local_depth(index);
        self.set_local_depth(index, depth - 1);
    }

    pub fn set_bucket_page_id(&mut self, index: usize, page_id: PageId) {
        LittleEndian::write_i32(
            &mut self.buf.as_mut()[BUCKET_PAGE_IDS_OFFSET + index * 4..],
            page_id,
        );
    }
}
