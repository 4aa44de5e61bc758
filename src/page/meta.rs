//! The meta record stored in block 0.

use super::{PageBuf, INVALID_LEVEL, MAX_LEVEL};
use bytemuck::{Pod, Zeroable};

/// Magic number distinguishing pagevec meta pages.
pub const HNSW_MAGIC: u32 = 0xDBAC_9527;

/// Current meta record version.
pub const HNSW_VERSION: u32 = 1;

/// Metadata of one index, one record per index in block 0.
///
/// # Invariants
///
/// `max_level ∈ {-1} ∪ [0, MAX_LEVEL)`; `-1` means the index is empty.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct MetaPageData {
    /// Always [`HNSW_MAGIC`].
    pub magic: u32,
    /// Record format version.
    pub version: u32,
    /// Vector dimensionality.
    pub dims: u32,
    /// Base fan-out `M` (levels above 0).
    pub m: u32,
    /// Level-0 fan-out, `2 * M`.
    pub m0: u32,
    /// Construction beam width.
    pub ef_construction: u32,
    /// Query beam width.
    pub ef_search: u32,
    /// Distance kind code (see [`crate::metric::DistanceKind`]).
    pub distance: u32,
    /// Highest level holding any tuple, or `-1` when empty.
    pub max_level: i32,
    /// Block number of each level's bucket page.
    pub level_blk: [u32; MAX_LEVEL],
}

const _: () = assert!(core::mem::size_of::<MetaPageData>() == 36 + 4 * MAX_LEVEL);

impl MetaPageData {
    /// True when no tuple has been inserted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.max_level == INVALID_LEVEL
    }
}

impl PageBuf {
    /// The meta record in a meta page's contents.
    #[must_use]
    pub fn meta(&self) -> &MetaPageData {
        bytemuck::from_bytes(&self.0[..core::mem::size_of::<MetaPageData>()])
    }

    /// Mutable meta record.
    pub fn meta_mut(&mut self) -> &mut MetaPageData {
        bytemuck::from_bytes_mut(&mut self.0[..core::mem::size_of::<MetaPageData>()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::F_META;

    #[test]
    fn meta_record_roundtrip() {
        let mut page = PageBuf::zeroed();
        page.init(F_META, INVALID_LEVEL as i16);
        {
            let meta = page.meta_mut();
            meta.magic = HNSW_MAGIC;
            meta.version = HNSW_VERSION;
            meta.dims = 128;
            meta.m = 16;
            meta.m0 = 32;
            meta.max_level = INVALID_LEVEL;
            meta.level_blk = [1, 2, 3, 4, 5, 6, 7, 8];
        }
        let meta = page.meta();
        assert_eq!(meta.magic, HNSW_MAGIC);
        assert!(meta.is_empty());
        assert_eq!(meta.level_blk[7], 8);
    }
}
