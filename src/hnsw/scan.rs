//! The query scan: a lazy `first`/`next` protocol over a result queue.
//!
//! `begin_scan` captures the operator payload `(query, threshold,
//! topk)`. The first `next` call refreshes the meta record, descends
//! the upper levels greedily, beam-searches level 0 and drains the
//! candidates into a min-ordered result queue; every call pops the
//! best remaining hit until `topk` have been returned or the queue
//! empties.

use super::index::HnswIndex;
use super::search::Candidate;
use crate::error::{HnswError, Result};
use crate::page::INVALID_LEVEL;
use crate::tuple::{HeapPointer, NodeId};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// One scan result: the owning row and its distance to the query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanHit {
    /// Opaque reference to the owning source row.
    pub heap_ptr: HeapPointer,
    /// Distance to the query vector.
    pub distance: f32,
}

/// An in-progress index scan.
pub struct IndexScan<'a> {
    index: &'a HnswIndex,
    query: Vec<f32>,
    threshold: f32,
    topk: usize,
    queue: BinaryHeap<Reverse<Candidate>>,
    returned: usize,
    first_call: bool,
}

impl HnswIndex {
    /// Opens a scan for the `topk` nearest neighbors of `query`.
    ///
    /// `threshold` is carried for the caller's recheck logic; the scan
    /// itself orders purely by distance.
    #[must_use]
    pub fn begin_scan(&self, query: &[f32], threshold: f32, topk: usize) -> IndexScan<'_> {
        IndexScan {
            index: self,
            query: query.to_vec(),
            threshold,
            topk,
            queue: BinaryHeap::new(),
            returned: 0,
            first_call: true,
        }
    }
}

impl IndexScan<'_> {
    /// The scan's query vector.
    #[must_use]
    pub fn query(&self) -> &[f32] {
        &self.query
    }

    /// The scan-key threshold, unchanged.
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Returns the next hit in non-decreasing distance order, or
    /// `None` once `topk` hits were produced or the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns `DimMismatch` when the query width differs from the
    /// meta record, and propagates storage errors.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<ScanHit>> {
        if self.first_call {
            self.first()?;
            self.first_call = false;
        }

        if self.returned >= self.topk {
            return Ok(None);
        }

        while let Some(Reverse(candidate)) = self.queue.pop() {
            let (heap_ptr, deleted) = self.index.with_tuple(candidate.id, |t| {
                (t.header().heap_ptr, t.header().deleted != 0)
            })?;
            // Tombstones set after the queue was filled are re-checked
            // here so a deleted row is never handed out.
            if deleted {
                continue;
            }
            self.returned += 1;
            return Ok(Some(ScanHit {
                heap_ptr,
                distance: candidate.distance,
            }));
        }
        Ok(None)
    }

    /// Drains the scan into a vector.
    ///
    /// # Errors
    ///
    /// Same as [`IndexScan::next`].
    pub fn collect_hits(&mut self) -> Result<Vec<ScanHit>> {
        let mut hits = Vec::new();
        while let Some(hit) = self.next()? {
            hits.push(hit);
        }
        Ok(hits)
    }

    fn first(&mut self) -> Result<()> {
        let meta = self.index.cached_meta(true)?;
        if meta.dims as usize != self.query.len() {
            return Err(HnswError::DimMismatch {
                expected: meta.dims,
                actual: self.query.len() as u32,
            });
        }
        if meta.max_level == INVALID_LEVEL {
            return Ok(());
        }

        let mut start = NodeId::INVALID;
        for l in (1..=meta.max_level).rev() {
            let bucket = self.index.read_bucket(meta.level_blk[l as usize])?;
            if !start.is_valid() {
                start = bucket.entry;
            }
            if start.is_valid() {
                start = self.index.greedy_search(bucket.ntuples, &self.query, start)?;
            }
        }

        if !start.is_valid() {
            // max_level == 0, or the descent dead-ended: seed from the
            // level-0 bucket directly.
            let bucket = self.index.read_bucket(meta.level_blk[0])?;
            start = bucket.entry;
        }

        if start.is_valid() {
            let ef = (meta.ef_search as usize).max(self.topk);
            let mut ep = start;
            let candidates = self.index.search_level(ef, &self.query, &mut ep)?;
            for candidate in candidates {
                self.queue.push(Reverse(candidate));
            }
        }
        Ok(())
    }
}
