//! Search primitives: greedy descent, beam search at one level, and the
//! neighbor selection rules.
//!
//! All primitives read tuples through short-lived pins. The current
//! node's tuple lock is held only while its neighbor array is copied
//! out; distance evaluation happens on the copies.

use super::index::HnswIndex;
use super::visited::VisitedSet;
use crate::error::Result;
use crate::tuple::{Neighbor, NodeId};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A search candidate: one node and its distance to the query.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Candidate {
    /// Distance to the query vector.
    pub distance: f32,
    /// The node.
    pub id: NodeId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.id == other.id
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance)
    }
}

/// Orders candidates worst-first, i.e. descending by distance.
pub(crate) fn sort_descending(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.distance.total_cmp(&a.distance));
}

impl HnswIndex {
    /// Copies a node's live neighbor entries under its tuple lock.
    pub(crate) fn neighbors_snapshot(&self, id: NodeId) -> Result<Vec<Neighbor>> {
        let _lock = self.pool().tuple_lock(id);
        self.with_tuple(id, |t| t.neighbors().to_vec())
    }

    /// Greedy descent within one level.
    ///
    /// Starting from `ep`, repeatedly moves to the out-neighbor closest
    /// to `q` until no neighbor improves the distance or `max_hops`
    /// hops were made. Returns the best-found node's id on the level
    /// below (its `next` pointer).
    pub(crate) fn greedy_search(&self, max_hops: u32, q: &[f32], ep: NodeId) -> Result<NodeId> {
        let distance = *self.distance();
        let (entry_next, mut best_dist) =
            self.with_tuple(ep, |t| {
                (t.header().next, distance.eval(q, t.vector(), t.header().bias))
            })?;

        let mut curr = ep;
        for _ in 0..max_hops {
            let neighbors = self.neighbors_snapshot(curr)?;
            let mut moved = false;
            for n in &neighbors {
                let d = self
                    .with_tuple(n.id, |t| distance.eval(q, t.vector(), t.header().bias))?;
                if d < best_dist {
                    best_dist = d;
                    curr = n.id;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }

        if curr == ep {
            Ok(entry_next)
        } else {
            self.with_tuple(curr, |t| t.header().next)
        }
    }

    /// Beam search at one level.
    ///
    /// Produces a max-heap of at most `ef` live nodes found on the
    /// level and advances `ep` to the best-found node's `next` pointer
    /// for the next level down. Tombstoned nodes stay in the frontier
    /// for transit but never enter the result heap.
    pub(crate) fn search_level(
        &self,
        ef: usize,
        q: &[f32],
        ep: &mut NodeId,
    ) -> Result<BinaryHeap<Candidate>> {
        let distance = *self.distance();
        let start = *ep;

        let (entry_next, entry_dist, entry_deleted) = self.with_tuple(start, |t| {
            (
                t.header().next,
                distance.eval(q, t.vector(), t.header().bias),
                t.header().deleted != 0,
            )
        })?;

        let mut visited = VisitedSet::new();
        let mut top: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();

        let mut best = Candidate {
            distance: entry_dist,
            id: start,
        };
        let mut lower_bound = entry_dist;

        visited.insert(start);
        frontier.push(Reverse(best));
        if !entry_deleted {
            top.push(best);
        }

        while let Some(Reverse(candidate)) = frontier.pop() {
            if candidate.distance > lower_bound {
                break;
            }

            let neighbors = self.neighbors_snapshot(candidate.id)?;
            for n in &neighbors {
                if !visited.insert(n.id) {
                    continue;
                }
                let (d, deleted) = self.with_tuple(n.id, |t| {
                    (
                        distance.eval(q, t.vector(), t.header().bias),
                        t.header().deleted != 0,
                    )
                })?;

                if d < best.distance {
                    best = Candidate { distance: d, id: n.id };
                }

                if top.len() < ef || d < lower_bound {
                    let next_candidate = Candidate { distance: d, id: n.id };
                    frontier.push(Reverse(next_candidate));
                    if !deleted {
                        top.push(next_candidate);
                        if top.len() > ef {
                            top.pop();
                        }
                    }
                    if let Some(worst) = top.peek() {
                        lower_bound = worst.distance;
                    }
                }
            }
        }

        *ep = if best.id == start {
            entry_next
        } else {
            self.with_tuple(best.id, |t| t.header().next)?
        };
        Ok(top)
    }

    /// Picks up to `m` nearest candidates by distance alone.
    ///
    /// The candidate heap is max-ordered; the worst `len - m` entries
    /// are discarded as they surface. The survivors come out worst
    /// first.
    pub(crate) fn select_neighbors_simple(
        mut candidates: BinaryHeap<Candidate>,
        m: usize,
    ) -> Vec<Candidate> {
        let mut output = Vec::with_capacity(m.min(candidates.len()));
        while let Some(candidate) = candidates.pop() {
            if candidates.len() >= m {
                continue;
            }
            output.push(candidate);
        }
        output
    }

    /// The HNSW diversity rule over a candidate max-heap.
    ///
    /// Iterating nearest-first, a candidate `v` is accepted iff it is
    /// closer to the query than to every already-accepted winner. Falls
    /// back to the simple rule when the heap is small enough to keep
    /// whole.
    pub(crate) fn select_neighbors_heuristic(
        &self,
        candidates: BinaryHeap<Candidate>,
        m: usize,
    ) -> Result<Vec<Candidate>> {
        if candidates.len() <= m {
            return Ok(Self::select_neighbors_simple(candidates, m));
        }
        self.diversity_select(candidates.into_sorted_vec(), m)
    }

    /// Diversity rule over an ascending candidate list. The candidate
    /// distances are relative to one common target (the query, or the
    /// owner of a neighbor array being re-selected).
    pub(crate) fn diversity_select(
        &self,
        ascending: Vec<Candidate>,
        m: usize,
    ) -> Result<Vec<Candidate>> {
        let distance = *self.distance();
        let mut accepted: Vec<(Candidate, Vec<f32>)> = Vec::with_capacity(m);

        for v in ascending {
            if accepted.len() >= m {
                break;
            }
            let v_vec = self.tuple_vector(v.id)?;
            let good = accepted
                .iter()
                .all(|(_, w_vec)| distance.pairwise(&v_vec, w_vec) >= v.distance);
            if good {
                accepted.push((v, v_vec));
            }
        }

        Ok(accepted.into_iter().map(|(c, _)| c).collect())
    }

    /// Selection used when wiring links: the diversity heuristic by
    /// default, the simple nearest rule when `link_nearest` is set
    /// (implied by the `linear` algorithm).
    pub(crate) fn select_for_link(
        &self,
        candidates: BinaryHeap<Candidate>,
        m: usize,
    ) -> Result<Vec<Candidate>> {
        if self.link_nearest() {
            Ok(Self::select_neighbors_simple(candidates, m))
        } else {
            self.select_neighbors_heuristic(candidates, m)
        }
    }
}
