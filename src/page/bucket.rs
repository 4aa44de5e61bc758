//! Per-level bucket records.

use super::PageBuf;
use crate::tuple::{NodeId, INVALID_BLOCK};
use bytemuck::{Pod, Zeroable};

/// The head record of one level, stored in the page named by
/// `meta.level_blk[level]`.
///
/// # Invariants
///
/// `entry` is valid iff `ntuples > 0`; all overflow pages chained from
/// the bucket carry the bucket's `level`.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct BucketData {
    /// Level number.
    pub level: u32,
    /// Vector dimensionality (copied from the meta record).
    pub dims: u32,
    /// Number of tuples on this level.
    pub ntuples: u32,
    /// Number of overflow pages chained from this bucket.
    pub pages: u32,
    /// Entry point seeding searches at this level.
    pub entry: NodeId,
    /// Current write head of the overflow chain.
    pub first_free: u32,
    /// Head of the full-page list (tracked, not consulted).
    pub first_full: u32,
}

const _: () = assert!(core::mem::size_of::<BucketData>() == 32);
const _: () = assert!(core::mem::align_of::<BucketData>() == 8);

impl BucketData {
    /// A fresh bucket for one level.
    #[must_use]
    pub fn new(level: u32, dims: u32) -> Self {
        Self {
            level,
            dims,
            ntuples: 0,
            pages: 0,
            entry: NodeId::INVALID,
            first_free: INVALID_BLOCK,
            first_full: INVALID_BLOCK,
        }
    }
}

impl PageBuf {
    /// The bucket record in a bucket page's contents.
    #[must_use]
    pub fn bucket(&self) -> &BucketData {
        bytemuck::from_bytes(&self.0[..core::mem::size_of::<BucketData>()])
    }

    /// Mutable bucket record.
    pub fn bucket_mut(&mut self) -> &mut BucketData {
        bytemuck::from_bytes_mut(&mut self.0[..core::mem::size_of::<BucketData>()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::F_BUCKET;

    #[test]
    fn fresh_bucket() {
        let bucket = BucketData::new(3, 64);
        assert_eq!(bucket.level, 3);
        assert_eq!(bucket.ntuples, 0);
        assert!(!bucket.entry.is_valid());
        assert_eq!(bucket.first_free, INVALID_BLOCK);
    }

    #[test]
    fn bucket_record_on_page() {
        let mut page = PageBuf::zeroed();
        page.init(F_BUCKET, 2);
        *page.bucket_mut() = BucketData::new(2, 16);
        page.bucket_mut().ntuples = 5;
        page.bucket_mut().entry = NodeId::new(9, 1);
        assert_eq!(page.bucket().ntuples, 5);
        assert_eq!(page.bucket().entry, NodeId::new(9, 1));
    }
}
