//! Tombstone-based bulk deletion and vacuum cleanup.
//!
//! Bulk delete marks matching tuples deleted in place; neighbor arrays
//! are never rewritten, visibility is enforced at query time. Cleanup
//! returns whole-empty pages to the free list.

use super::index::HnswIndex;
use crate::error::Result;
use crate::tuple::{HeapPointer, TupleMut};

/// Counters reported by [`HnswIndex::bulk_delete`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DeleteStats {
    /// Tuples newly marked deleted.
    pub tuples_removed: u64,
}

/// Counters reported by [`HnswIndex::vacuum_cleanup`].
#[derive(Clone, Copy, Debug, Default)]
pub struct VacuumStats {
    /// Total pages in the index file.
    pub num_pages: u32,
    /// Pages handed back to the free list.
    pub pages_free: u32,
    /// Tuple records remaining on overflow pages.
    pub num_index_tuples: u64,
}

impl HnswIndex {
    /// Marks every tuple whose heap reference the callback claims as
    /// deleted. The tuples stay in place for routing; they are hidden
    /// from scan results.
    ///
    /// # Errors
    ///
    /// Propagates storage errors; honors cancellation at page
    /// boundaries.
    pub fn bulk_delete(
        &self,
        mut callback: impl FnMut(HeapPointer) -> bool,
    ) -> Result<DeleteStats> {
        let meta = self.cached_meta(false)?;
        let size = self.record_size(&meta);
        let mut stats = DeleteStats::default();

        let npages = self.pool().nblocks();
        for blkno in 0..npages {
            self.check_interrupt()?;
            let page = self.pool().pin(blkno)?;
            let mut guard = page.write();

            // Empty and already-deleted pages wait for cleanup; meta
            // and bucket pages hold no tuples.
            if guard.is_new() || guard.is_deleted() || guard.is_meta() || guard.is_bucket() {
                continue;
            }

            let maxoff = guard.max_offset();
            let mut changed = false;
            for off in 1..=maxoff {
                let mut tup = TupleMut::new(guard.tuple_bytes_mut(off, size));
                let header = tup.header();
                if callback(header.heap_ptr) {
                    tup.set_deleted(true);
                    stats.tuples_removed += 1;
                    changed = true;
                }
            }

            if changed && maxoff == 0 {
                guard.set_deleted();
            }
        }

        Ok(stats)
    }

    /// Returns empty pages to the free list and counts the rest.
    ///
    /// # Errors
    ///
    /// Propagates storage errors; honors cancellation at page
    /// boundaries.
    pub fn vacuum_cleanup(&self) -> Result<VacuumStats> {
        let npages = self.pool().nblocks();
        let mut stats = VacuumStats {
            num_pages: npages,
            ..VacuumStats::default()
        };

        for blkno in 0..npages {
            self.check_interrupt()?;
            let page = self.pool().pin(blkno)?;
            let guard = page.read();

            if guard.is_new() || guard.is_deleted() {
                self.pool().record_free(blkno);
                stats.pages_free += 1;
            } else if guard.is_meta() || guard.is_bucket() {
                // Nothing to reclaim.
            } else {
                stats.num_index_tuples += u64::from(guard.max_offset());
            }
        }

        Ok(stats)
    }
}
