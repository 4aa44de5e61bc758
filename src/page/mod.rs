//! Page layout for the on-disk index.
//!
//! Every block is a 32 KiB page. Block 0 is the meta page, blocks
//! `level_blk[l]` are the per-level bucket pages, and every other block
//! is an overflow page holding a sequence of fixed-size tuple records.
//! The opaque header sits in the last bytes of the page so external
//! tooling can identify index pages by the trailing page id.

/// Per-level bucket record.
pub mod bucket;
/// Meta record (block 0).
pub mod meta;

pub use bucket::BucketData;
pub use meta::MetaPageData;

use crate::tuple::INVALID_BLOCK;
use bytemuck::{Pod, Zeroable};

/// Fixed page size; the layout assumes 32 KiB blocks.
pub const PAGE_SIZE: usize = 32 * 1024;

/// Number of graph levels (bucket pages) an index carries.
pub const MAX_LEVEL: usize = 8;

/// `max_level` value of an empty index.
pub const INVALID_LEVEL: i32 = -1;

/// Identifies pagevec pages for external tooling; last two bytes of
/// every page.
pub const HNSW_PAGE_ID: u16 = 0xFF84;

/// Block number of the meta page.
pub const META_BLKNO: u32 = 0;

/// Page flag: overflow page holding tuple records.
pub const F_OVERFLOW: u16 = 1 << 0;
/// Page flag: per-level bucket page.
pub const F_BUCKET: u16 = 1 << 1;
/// Page flag: the meta page.
pub const F_META: u16 = 1 << 2;
/// Page flag: page is whole-deleted and may be recycled.
pub const F_DELETED: u16 = 1 << 3;

/// Opaque header stored in the last [`OPAQUE_SIZE`] bytes of a page.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct PageOpaque {
    /// Previous page of this level's chain.
    pub prev_blkno: u32,
    /// Next page of this level's chain.
    pub next_blkno: u32,
    /// Level the page belongs to (`-1` for the meta page).
    pub level: i16,
    /// Number of tuple records on the page.
    pub maxoff: u16,
    /// Page type code and flag bits.
    pub flags: u16,
    /// Always [`HNSW_PAGE_ID`]; last two bytes of the page.
    pub page_id: u16,
}

/// Size of the opaque header.
pub const OPAQUE_SIZE: usize = 16;

const _: () = assert!(core::mem::size_of::<PageOpaque>() == OPAQUE_SIZE);

/// Usable bytes before the opaque header.
pub const CONTENT_SIZE: usize = PAGE_SIZE - OPAQUE_SIZE;

/// One 32 KiB page buffer, aligned so typed views over its contents
/// are valid.
#[repr(C, align(8))]
pub struct PageBuf(
    /// The raw page bytes.
    pub [u8; PAGE_SIZE],
);

impl PageBuf {
    /// A zero-filled (never initialized) page.
    #[must_use]
    pub fn zeroed() -> Box<Self> {
        Box::new(Self([0; PAGE_SIZE]))
    }

    /// The opaque header.
    #[must_use]
    pub fn opaque(&self) -> &PageOpaque {
        bytemuck::from_bytes(&self.0[CONTENT_SIZE..])
    }

    /// Mutable opaque header.
    pub fn opaque_mut(&mut self) -> &mut PageOpaque {
        bytemuck::from_bytes_mut(&mut self.0[CONTENT_SIZE..])
    }

    /// (Re)initializes the page with the given type flags and level.
    pub fn init(&mut self, flags: u16, level: i16) {
        self.0.fill(0);
        *self.opaque_mut() = PageOpaque {
            prev_blkno: INVALID_BLOCK,
            next_blkno: INVALID_BLOCK,
            level,
            maxoff: 0,
            flags,
            page_id: HNSW_PAGE_ID,
        };
    }

    /// True when the page was never initialized.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.opaque().page_id == 0
    }

    /// True for the meta page.
    #[must_use]
    pub fn is_meta(&self) -> bool {
        self.opaque().flags & F_META != 0
    }

    /// True for bucket pages.
    #[must_use]
    pub fn is_bucket(&self) -> bool {
        self.opaque().flags & F_BUCKET != 0
    }

    /// True for overflow pages.
    #[must_use]
    pub fn is_overflow(&self) -> bool {
        self.opaque().flags & F_OVERFLOW != 0
    }

    /// True when the page has been whole-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.opaque().flags & F_DELETED != 0
    }

    /// Marks the page whole-deleted.
    pub fn set_deleted(&mut self) {
        self.opaque_mut().flags |= F_DELETED;
    }

    /// Number of tuple records on the page.
    #[must_use]
    pub fn max_offset(&self) -> u16 {
        self.opaque().maxoff
    }

    /// Free bytes left for tuple records of the given uniform size.
    #[must_use]
    pub fn free_space(&self, tuple_size: usize) -> usize {
        CONTENT_SIZE.saturating_sub(self.max_offset() as usize * tuple_size)
    }

    /// Appends a tuple record, returning its 1-based offset, or `None`
    /// when the page lacks room.
    pub fn add_tuple(&mut self, record: &[u8]) -> Option<u16> {
        let size = record.len();
        if self.free_space(size) < size {
            return None;
        }
        let off = self.max_offset() + 1;
        let start = (off as usize - 1) * size;
        self.0[start..start + size].copy_from_slice(record);
        self.opaque_mut().maxoff = off;
        Some(off)
    }

    /// The record bytes at a 1-based tuple offset.
    #[must_use]
    pub fn tuple_bytes(&self, off: u16, tuple_size: usize) -> &[u8] {
        let start = (off as usize - 1) * tuple_size;
        &self.0[start..start + tuple_size]
    }

    /// Mutable record bytes at a 1-based tuple offset.
    pub fn tuple_bytes_mut(&mut self, off: u16, tuple_size: usize) -> &mut [u8] {
        let start = (off as usize - 1) * tuple_size;
        &mut self.0[start..start + tuple_size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_stamps_opaque() {
        let mut page = PageBuf::zeroed();
        assert!(page.is_new());
        page.init(F_OVERFLOW, 3);
        assert!(!page.is_new());
        assert!(page.is_overflow());
        assert!(!page.is_bucket());
        let op = page.opaque();
        assert_eq!(op.prev_blkno, INVALID_BLOCK);
        assert_eq!(op.next_blkno, INVALID_BLOCK);
        assert_eq!(op.level, 3);
        assert_eq!(op.maxoff, 0);
        assert_eq!(op.page_id, HNSW_PAGE_ID);
        // The page id sentinel occupies the last two bytes.
        assert_eq!(&page.0[PAGE_SIZE - 2..], &HNSW_PAGE_ID.to_le_bytes());
    }

    #[test]
    fn tuple_placement() {
        let mut page = PageBuf::zeroed();
        page.init(F_OVERFLOW, 0);
        let record = vec![0xAB_u8; 968];
        let per_page = CONTENT_SIZE / record.len();

        for i in 0..per_page {
            let off = page.add_tuple(&record).expect("room left");
            assert_eq!(off as usize, i + 1);
        }
        assert_eq!(page.add_tuple(&record), None);
        assert_eq!(page.max_offset() as usize, per_page);
        assert_eq!(page.tuple_bytes(1, record.len()), &record[..]);
    }

    #[test]
    fn deleted_flag() {
        let mut page = PageBuf::zeroed();
        page.init(F_OVERFLOW, 0);
        assert!(!page.is_deleted());
        page.set_deleted();
        assert!(page.is_deleted());
        assert!(page.is_overflow());
    }
}
