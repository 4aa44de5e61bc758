//! Parallel L0 edge finalization.
//!
//! Workers share a small control block and claim L0 pages one at a
//! time under its mutex, following the chain's next pointers. Edge
//! writes contend on tuple locks, so the resulting graph depends on
//! scheduling but always honors the degree bounds.

use super::index::HnswIndex;
use crate::error::{HnswError, Result};
use crate::tuple::{NodeId, INVALID_BLOCK};
use parking_lot::Mutex;

/// Inputs captured from the bucket pages before the workers start.
#[derive(Clone, Copy, Debug)]
pub(crate) struct L0Plan {
    /// Entry point of level 1 (invalid when `max_level == 0`).
    pub l1_entry: NodeId,
    /// Tuple count of level 1, bounding the greedy descent.
    pub l1_ntuples: u32,
    /// Entry point of level 0, the fallback seed without upper levels.
    pub l0_entry: NodeId,
    /// First page of the L0 chain.
    pub first_blkno: u32,
    /// Total L0 pages, for progress reporting.
    pub l0_pages: u32,
}

/// Shared control block; the mutex serializes work claims.
struct L0Shared {
    blkno: u32,
    done_pages: u32,
    nworker: u32,
}

/// Fans the L0 chain out across `workers` threads.
pub(crate) fn build_l0(index: &HnswIndex, plan: L0Plan, workers: u32) -> Result<()> {
    if plan.first_blkno == INVALID_BLOCK {
        return Ok(());
    }

    let meta = index.cached_meta(false)?;
    let ef_construction = meta.ef_construction as usize;

    let shared = Mutex::new(L0Shared {
        blkno: plan.first_blkno,
        done_pages: 0,
        nworker: 0,
    });
    let failure: Mutex<Option<HnswError>> = Mutex::new(None);

    let workers_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers as usize)
        .build()
        .map_err(|e| HnswError::InvalidOption(format!("worker pool: {e}")))?;

    workers_pool.scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|_| {
                if let Err(e) = worker_loop(index, &shared, &plan, ef_construction) {
                    let mut slot = failure.lock();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
            });
        }
    });

    match failure.into_inner() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn worker_loop(
    index: &HnswIndex,
    shared: &Mutex<L0Shared>,
    plan: &L0Plan,
    ef_construction: usize,
) -> Result<()> {
    let worker_id = {
        let mut s = shared.lock();
        let id = s.nworker;
        s.nworker += 1;
        id
    };
    log::info!("build in worker #{worker_id}");

    loop {
        index.check_interrupt()?;

        // Claim one page and advance the shared cursor while holding
        // the mutex, so every page is handed out exactly once.
        let (my_blkno, maxoff, done) = {
            let mut s = shared.lock();
            if s.blkno == INVALID_BLOCK {
                return Ok(());
            }
            let my_blkno = s.blkno;
            let (next, maxoff) = {
                let page = index.pool().pin(my_blkno)?;
                let guard = page.read();
                (guard.opaque().next_blkno, guard.max_offset())
            };
            s.blkno = next;
            let done = s.done_pages;
            s.done_pages += 1;
            (my_blkno, maxoff, done)
        };

        if done % 100 == 0 {
            log::info!(
                "worker #{worker_id}: L0 pages {done}/{total}",
                total = plan.l0_pages
            );
        }

        for off in 1..=maxoff {
            let node = NodeId::new(my_blkno, off);
            let q = index.tuple_vector(node)?;

            let mut ep = plan.l1_entry;
            if ep.is_valid() {
                ep = index.greedy_search(plan.l1_ntuples, &q, ep)?;
            }
            if !ep.is_valid() {
                // max_level == 0: seed directly from the L0 bucket.
                ep = plan.l0_entry;
            }
            if !ep.is_valid() {
                continue;
            }

            let candidates = index.search_level(ef_construction, &q, &mut ep)?;
            index.bidirection_connect2(candidates, node, 0)?;
        }
    }
}
