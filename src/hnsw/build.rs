//! The bulk build driver.
//!
//! Two modes: sequential (every record takes the full insert path) and
//! two-phase parallel (phase A inserts records without edges, phase B
//! walks every level chain computing edges and hands the L0 chain to
//! the worker pool).

use super::index::HnswIndex;
use super::insert::IndexEntry;
use crate::error::{HnswError, Result};
use crate::options::BuildOptions;
use crate::page::INVALID_LEVEL;
use crate::tuple::{NodeId, INVALID_BLOCK};

/// Mutable state threaded through one build or one online insert.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BuildState {
    /// Whether the meta page must be flushed (`max_level` grew).
    pub flush: bool,
    /// Highest level observed.
    pub max_level: i32,
    /// Records indexed so far.
    pub indtuples: u64,
}

impl Default for BuildState {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildState {
    pub(crate) fn new() -> Self {
        Self {
            flush: false,
            max_level: INVALID_LEVEL,
            indtuples: 0,
        }
    }
}

/// Counters reported by a finished build.
#[derive(Clone, Copy, Debug)]
pub struct BuildStats {
    /// Records written into the index.
    pub indexed_tuples: u64,
    /// Final `max_level`.
    pub max_level: i32,
}

impl HnswIndex {
    /// Bulk-builds the index from a record stream.
    ///
    /// With `parallel_workers == 0` every record runs the full insert
    /// path. Otherwise phase A inserts all records without edges and
    /// phase B computes edges level by level, fanning the L0 chain out
    /// across the workers. The meta record is flushed once at the end.
    ///
    /// # Errors
    ///
    /// Fails on a non-empty index, bad options, dimension mismatches
    /// and storage errors.
    pub fn build<I>(&self, entries: I, options: &BuildOptions) -> Result<BuildStats>
    where
        I: IntoIterator<Item = IndexEntry>,
    {
        options.validate()?;
        let meta = self.cached_meta(true)?;
        if !meta.is_empty() {
            return Err(HnswError::InvalidOption(
                "index already contains data".to_owned(),
            ));
        }

        let parallel = options.parallel_workers > 0;
        let mut state = BuildState::new();

        for entry in entries {
            self.insert_internal(&entry, !parallel, &mut state, false)?;
        }

        if state.flush {
            self.update_meta_max_level(state.max_level)?;
        }
        log::info!(
            "build indexed {} tuples, max level {}",
            state.indtuples,
            state.max_level
        );

        if parallel {
            self.build_graph(options.parallel_workers)?;
        }

        self.flush()?;
        Ok(BuildStats {
            indexed_tuples: state.indtuples,
            max_level: state.max_level,
        })
    }

    /// Phase B: walks every level's chain computing edges. Levels above
    /// 0 are built sequentially; the L0 chain goes to the worker pool.
    fn build_graph(&self, workers: u32) -> Result<()> {
        let meta = self.cached_meta(false)?;
        if meta.max_level == INVALID_LEVEL {
            return Ok(());
        }

        let mut l1_entry = NodeId::INVALID;
        let mut l1_ntuples = 0u32;
        let mut l0_first = INVALID_BLOCK;
        let mut l0_entry = NodeId::INVALID;
        let mut l0_pages = 0u32;

        for l in (0..=meta.max_level).rev() {
            log::info!("build level {l}");
            let bucket_blkno = meta.level_blk[l as usize];
            let bucket = self.read_bucket(bucket_blkno)?;
            let start = bucket.entry;
            let first_blk = {
                let page = self.pool().pin(bucket_blkno)?;
                let guard = page.read();
                guard.opaque().next_blkno
            };

            if l == 1 {
                l1_entry = start;
                l1_ntuples = bucket.ntuples;
            }
            if l == 0 {
                l0_first = first_blk;
                l0_entry = start;
                l0_pages = bucket.pages;
            }

            if bucket.ntuples <= 1 {
                continue;
            }
            if l == 0 {
                // The L0 chain is handed to the workers.
                break;
            }

            let mut blkno = first_blk;
            while blkno != INVALID_BLOCK {
                self.check_interrupt()?;
                let (next, maxoff) = {
                    let page = self.pool().pin(blkno)?;
                    let guard = page.read();
                    (guard.opaque().next_blkno, guard.max_offset())
                };

                for off in 1..=maxoff {
                    let node = NodeId::new(blkno, off);
                    let q = self.tuple_vector(node)?;
                    let mut ep = start;
                    let candidates =
                        self.search_level(meta.ef_construction as usize, &q, &mut ep)?;
                    self.bidirection_connect2(candidates, node, l as u32)?;
                }

                blkno = next;
            }
        }

        super::parallel::build_l0(
            self,
            super::parallel::L0Plan {
                l1_entry,
                l1_ntuples,
                l0_entry,
                first_blkno: l0_first,
                l0_pages,
            },
            workers,
        )
    }
}
