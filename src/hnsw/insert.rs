//! The insert path: level assignment, tuple placement on the per-level
//! chains, and bidirectional edge wiring with pruning.

use super::build::BuildState;
use super::index::HnswIndex;
use super::search::{sort_descending, Candidate};
use crate::error::{HnswError, Result};
use crate::page::{F_OVERFLOW, INVALID_LEVEL, MAX_LEVEL};
use crate::storage::{PageWriteGuard, PinnedPage};
use crate::tuple::{
    form_tuple, HeapPointer, Neighbor, NodeId, OwnedTuple, TupleMut, INVALID_BLOCK,
};
use rand::Rng;
use std::collections::BinaryHeap;

/// One record fed to the index: the owning row's reference, its vector
/// and the auxiliary scalars used by the `linear` scorer.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    /// Opaque reference to the owning source row.
    pub heap_ptr: HeapPointer,
    /// The vector, `meta.dims` wide.
    pub vector: Vec<f32>,
    /// Auxiliary id column.
    pub id: u32,
    /// Auxiliary bias column.
    pub bias: f32,
}

impl IndexEntry {
    /// An entry with zeroed auxiliary scalars.
    #[must_use]
    pub fn new(heap_ptr: HeapPointer, vector: Vec<f32>) -> Self {
        Self {
            heap_ptr,
            vector,
            id: 0,
            bias: 0.0,
        }
    }
}

/// Samples a node level: `floor(-ln(U(0,1]) / ln(m + 1))`, clamped to
/// `[0, MAX_LEVEL)`.
pub(crate) fn random_level(rng: &mut impl Rng, m: u32) -> u32 {
    let x: f64 = rng.gen_range(f64::EPSILON..=1.0);
    let level = -x.ln() / f64::from(m + 1).ln();
    (level as u32).min(MAX_LEVEL as u32 - 1)
}

impl HnswIndex {
    /// Inserts one record online: refreshes the cached meta record and
    /// flushes it when `max_level` grew.
    ///
    /// # Errors
    ///
    /// Returns `DimMismatch` for a vector of the wrong width and
    /// propagates storage errors.
    pub fn insert(&self, entry: &IndexEntry) -> Result<()> {
        let mut state = BuildState::new();
        self.insert_internal(entry, true, &mut state, true)?;
        if state.flush {
            self.update_meta_max_level(state.max_level)?;
        }
        Ok(())
    }

    /// The shared insert path. With `with_edges` unset only the tuple
    /// records and level links are written (phase A of the two-phase
    /// build).
    pub(crate) fn insert_internal(
        &self,
        entry: &IndexEntry,
        with_edges: bool,
        state: &mut BuildState,
        refresh: bool,
    ) -> Result<()> {
        let meta = self.cached_meta(refresh)?;
        if entry.vector.len() != meta.dims as usize {
            return Err(HnswError::DimMismatch {
                expected: meta.dims,
                actual: entry.vector.len() as u32,
            });
        }

        let level = {
            let mut rng = self.rng.lock();
            random_level(&mut *rng, meta.m)
        };
        let lc = meta.max_level;
        if lc < level as i32 {
            self.bump_cached_max_level(level as i32);
            state.flush = true;
        }
        state.max_level = state.max_level.max(lc.max(level as i32));

        let q = &entry.vector;

        // Greedy descent across the levels above the new node. The
        // edge-free phase-A insert skips the search entirely.
        let mut start = NodeId::INVALID;
        if with_edges && lc != INVALID_LEVEL {
            for l in ((level as i32 + 1)..=lc).rev() {
                let bucket = self.read_bucket(meta.level_blk[l as usize])?;
                if !start.is_valid() {
                    start = bucket.entry;
                }
                if start.is_valid() {
                    start = self.greedy_search(bucket.ntuples, q, start)?;
                }
            }
        }

        let mut placed = vec![NodeId::INVALID; level as usize + 1];

        for l in (0..=level).rev() {
            self.check_interrupt()?;
            let bucket_blkno = meta.level_blk[l as usize];
            let bucket_page = self.pool().pin(bucket_blkno)?;

            let record = form_tuple(entry.heap_ptr, l, meta.m, q, entry.id, entry.bias);

            let (node_id, prev_entry) = {
                let mut bucket_guard = bucket_page.write();
                let prev_entry = bucket_guard.bucket().entry;

                let first_free = bucket_guard.bucket().first_free;
                let ovfl_page = if first_free == INVALID_BLOCK {
                    self.add_first_page(&mut bucket_guard, bucket_blkno, l)?
                } else {
                    self.pool().pin(first_free)?
                };

                let node_id = match Self::place_record(&ovfl_page, &record) {
                    Some(id) => id,
                    None => {
                        self.check_interrupt()?;
                        let fresh = self.add_ovfl_page(&mut bucket_guard, &ovfl_page, l)?;
                        Self::place_record(&fresh, &record).ok_or_else(|| {
                            HnswError::PageAddFailed {
                                blkno: fresh.blkno(),
                            }
                        })?
                    }
                };

                let bucket = bucket_guard.bucket_mut();
                if bucket.ntuples == 0 {
                    bucket.entry = node_id;
                }
                bucket.ntuples += 1;
                (node_id, prev_entry)
            };

            if with_edges {
                let mut ep = if start.is_valid() { start } else { prev_entry };
                if ep.is_valid() {
                    let candidates =
                        self.search_level(meta.ef_construction as usize, q, &mut ep)?;
                    let mut cur = self.read_owned(node_id)?;
                    self.bidirection_connect(candidates, &mut cur)?;
                }
                start = ep;
            }

            placed[l as usize] = node_id;
        }

        // Link the per-level records top down.
        for l in (0..=level).rev() {
            let next = if l > 0 {
                placed[l as usize - 1]
            } else {
                NodeId::INVALID
            };
            self.set_tuple_next(placed[l as usize], next)?;
        }

        state.indtuples += 1;
        Ok(())
    }

    /// Adds the record to the page and stamps its own id into the
    /// header, all under one exclusive latch.
    fn place_record(page: &PinnedPage, record: &[u8]) -> Option<NodeId> {
        let mut guard = page.write();
        let off = guard.add_tuple(record)?;
        let node_id = NodeId::new(page.blkno(), off);
        let mut tup = TupleMut::new(guard.tuple_bytes_mut(off, record.len()));
        let mut header = tup.header();
        header.self_id = node_id;
        tup.set_header(&header);
        Some(node_id)
    }

    /// Allocates the first overflow page of an empty bucket chain.
    fn add_first_page(
        &self,
        bucket_guard: &mut PageWriteGuard<'_>,
        bucket_blkno: u32,
        level: u32,
    ) -> Result<PinnedPage> {
        let ovfl = self.pool().new_page()?;
        {
            let mut guard = ovfl.write();
            guard.init(F_OVERFLOW, level as i16);
            guard.opaque_mut().prev_blkno = bucket_blkno;
        }
        let bucket = bucket_guard.bucket_mut();
        bucket.pages += 1;
        bucket.first_free = ovfl.blkno();
        bucket_guard.opaque_mut().next_blkno = ovfl.blkno();
        Ok(ovfl)
    }

    /// Allocates a new overflow page and chains it at the tail of the
    /// level's chain. The caller holds the bucket page exclusively, so
    /// the tail cannot move underneath the walk.
    fn add_ovfl_page(
        &self,
        bucket_guard: &mut PageWriteGuard<'_>,
        from: &PinnedPage,
        level: u32,
    ) -> Result<PinnedPage> {
        let mut tail = from.clone();
        loop {
            let next = tail.read().opaque().next_blkno;
            if next == INVALID_BLOCK {
                break;
            }
            tail = self.pool().pin(next)?;
        }

        let ovfl = self.pool().new_page()?;
        {
            let mut guard = ovfl.write();
            guard.init(F_OVERFLOW, level as i16);
            guard.opaque_mut().prev_blkno = tail.blkno();
        }
        tail.write().opaque_mut().next_blkno = ovfl.blkno();

        let bucket = bucket_guard.bucket_mut();
        bucket.pages += 1;
        bucket.first_free = ovfl.blkno();
        Ok(ovfl)
    }

    /// Decodes one record into an owned tuple.
    pub(crate) fn read_owned(&self, id: NodeId) -> Result<OwnedTuple> {
        self.with_tuple(id, |t| OwnedTuple {
            header: *t.header(),
            vector: t.vector().to_vec(),
            neighbors: t.neighbors().to_vec(),
        })
    }

    /// Overwrites one record in place under its tuple lock.
    pub(crate) fn update_tuple(&self, id: NodeId, record: &[u8]) -> Result<()> {
        let _stripe = self.pool().tuple_lock(id);
        let page = self.pool().pin(id.blkno())?;
        let mut guard = page.write();
        if id.offset() == 0 || id.offset() > guard.max_offset() {
            return Err(HnswError::Corrupted(format!(
                "tuple offset {id:?} out of range"
            )));
        }
        TupleMut::new(guard.tuple_bytes_mut(id.offset(), record.len())).overwrite(record);
        Ok(())
    }

    /// Points one record at its counterpart on the level below.
    fn set_tuple_next(&self, id: NodeId, next: NodeId) -> Result<()> {
        let meta = self.cached_meta(false)?;
        let size = self.record_size(&meta);
        let _stripe = self.pool().tuple_lock(id);
        let page = self.pool().pin(id.blkno())?;
        let mut guard = page.write();
        let mut tup = TupleMut::new(guard.tuple_bytes_mut(id.offset(), size));
        let mut header = tup.header();
        header.next = next;
        tup.set_header(&header);
        Ok(())
    }

    /// Selects up to `maxM` winners from the candidate heap, writes
    /// them into the new tuple's neighbor array (worst first) and adds
    /// the back-edges, pruning full neighbors with the diversity rule.
    pub(crate) fn bidirection_connect(
        &self,
        candidates: BinaryHeap<Candidate>,
        cur: &mut OwnedTuple,
    ) -> Result<()> {
        let distance = *self.distance();
        let simple = self.link_nearest();
        let max_m = cur.header.max_m as usize;

        let mut winners = if simple {
            Self::select_neighbors_simple(candidates, max_m)
        } else {
            self.select_neighbors_heuristic(candidates, max_m)?
        };
        sort_descending(&mut winners);

        cur.neighbors = winners
            .iter()
            .map(|c| Neighbor {
                id: c.id,
                distance: c.distance,
            })
            .collect();

        for w in &winners {
            let (w_level, w_out, w_max, w_vec, w_bias) = self.with_tuple(w.id, |t| {
                let h = t.header();
                (h.level, h.out_degree, h.max_m, t.vector().to_vec(), h.bias)
            })?;
            if w_out > w_max {
                return Err(HnswError::BadDegree {
                    node: w.id,
                    out_degree: w_out,
                    max: w_max,
                });
            }
            if w.id == cur.header.self_id {
                return Err(HnswError::SelfLink(w.id));
            }
            if w_level != cur.header.level {
                return Err(HnswError::LevelMismatch {
                    left: cur.header.level,
                    right: w_level,
                });
            }

            let dist = if simple {
                distance.eval(&cur.vector, &w_vec, w_bias)
            } else {
                distance.pairwise(&cur.vector, &w_vec)
            };

            let kept = self.attach_back_edge(
                w.id,
                Neighbor {
                    id: cur.header.self_id,
                    distance: dist,
                },
                simple,
            )?;
            if kept {
                cur.header.in_degree += 1;
            }
        }

        self.update_tuple(cur.header.self_id, &cur.encode())
    }

    /// Adds `edge` to `target`'s neighbor array, re-running selection
    /// when the array is full. Counts the forward edge in `target`'s
    /// advisory in-degree and returns whether the back-edge survived.
    fn attach_back_edge(&self, target: NodeId, edge: Neighbor, simple: bool) -> Result<bool> {
        let meta = self.cached_meta(false)?;
        let size = self.record_size(&meta);
        let _stripe = self.pool().tuple_lock(target);

        let (header, old) =
            self.with_tuple(target, |t| (*t.header(), t.neighbors().to_vec()))?;
        let max_m = header.max_m as usize;

        if (header.out_degree as usize) < max_m {
            let page = self.pool().pin(target.blkno())?;
            let mut guard = page.write();
            let mut tup = TupleMut::new(guard.tuple_bytes_mut(target.offset(), size));
            tup.push_neighbor(edge);
            let mut h = tup.header();
            h.in_degree += 1;
            tup.set_header(&h);
            return Ok(true);
        }

        if simple {
            // Replace the farthest existing entry when the new edge is
            // closer; otherwise the back-edge is dropped.
            let mut replace = None;
            let mut maxdist = edge.distance;
            for (j, n) in old.iter().enumerate() {
                if n.distance > maxdist {
                    maxdist = n.distance;
                    replace = Some(j);
                }
            }
            let evicted = replace.map(|j| old[j].id);
            {
                let page = self.pool().pin(target.blkno())?;
                let mut guard = page.write();
                let mut tup = TupleMut::new(guard.tuple_bytes_mut(target.offset(), size));
                if let Some(j) = replace {
                    let mut neighbors = old;
                    neighbors[j] = edge;
                    tup.set_neighbors(&neighbors);
                }
                let mut h = tup.header();
                h.in_degree += 1;
                tup.set_header(&h);
            }
            if let Some(victim) = evicted {
                self.bump_in_degree(victim, -1)?;
            }
            return Ok(replace.is_some());
        }

        // Combine the full array with the new edge and re-run the
        // diversity rule against that set.
        let mut cands: Vec<Candidate> = old
            .iter()
            .map(|n| Candidate {
                distance: n.distance,
                id: n.id,
            })
            .collect();
        cands.push(Candidate {
            distance: edge.distance,
            id: edge.id,
        });
        cands.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let mut winners = self.diversity_select(cands, max_m)?;
        sort_descending(&mut winners);
        let edge_id = edge.id;
        let kept = winners.iter().any(|c| c.id == edge_id);
        let dropped: Vec<NodeId> = old
            .iter()
            .filter(|n| {
                let n_id = n.id;
                !winners.iter().any(|w| w.id == n_id)
            })
            .map(|n| n.id)
            .collect();

        {
            let page = self.pool().pin(target.blkno())?;
            let mut guard = page.write();
            let mut tup = TupleMut::new(guard.tuple_bytes_mut(target.offset(), size));
            let entries: Vec<Neighbor> = winners
                .iter()
                .map(|c| Neighbor {
                    id: c.id,
                    distance: c.distance,
                })
                .collect();
            tup.set_neighbors(&entries);
            let mut h = tup.header();
            h.in_degree += 1;
            tup.set_header(&h);
        }
        for victim in dropped {
            self.bump_in_degree(victim, -1)?;
        }
        Ok(kept)
    }

    /// Wires one already-placed node into its level: both edge
    /// directions are added through [`HnswIndex::make_link`]. Used by
    /// phase B of the two-phase build and the L0 workers.
    pub(crate) fn bidirection_connect2(
        &self,
        candidates: BinaryHeap<Candidate>,
        node: NodeId,
        level: u32,
    ) -> Result<()> {
        let meta = self.cached_meta(false)?;
        let max_m = if level == 0 { meta.m0 } else { meta.m } as usize;
        let mut winners = self.select_for_link(candidates, max_m)?;
        sort_descending(&mut winners);
        for w in &winners {
            self.make_link(node, w.id)?;
            self.make_link(w.id, node)?;
        }
        Ok(())
    }

    /// Adds a directed edge `source -> target`, pruning `source`'s
    /// array with the diversity rule when it is full. Self-links are
    /// skipped silently (the candidate set may contain the node
    /// itself during phase B).
    fn make_link(&self, source: NodeId, target: NodeId) -> Result<()> {
        if source == target {
            return Ok(());
        }
        let meta = self.cached_meta(false)?;
        let size = self.record_size(&meta);
        let distance = *self.distance();

        let _stripe = self.pool().tuple_lock(source);
        let (src_header, src_neighbors, src_vec) = self.with_tuple(source, |t| {
            (*t.header(), t.neighbors().to_vec(), t.vector().to_vec())
        })?;
        let t_vec = self.tuple_vector(target)?;
        let dist = distance.pairwise(&src_vec, &t_vec);
        let max_m = src_header.max_m as usize;

        if (src_header.out_degree as usize) > max_m {
            return Err(HnswError::BadDegree {
                node: source,
                out_degree: src_header.out_degree,
                max: src_header.max_m,
            });
        }

        self.bump_in_degree(target, 1)?;

        if (src_header.out_degree as usize) < max_m {
            let page = self.pool().pin(source.blkno())?;
            let mut guard = page.write();
            let mut tup = TupleMut::new(guard.tuple_bytes_mut(source.offset(), size));
            tup.push_neighbor(Neighbor {
                id: target,
                distance: dist,
            });
            return Ok(());
        }

        let mut cands: Vec<Candidate> = src_neighbors
            .iter()
            .map(|n| Candidate {
                distance: n.distance,
                id: n.id,
            })
            .collect();
        cands.push(Candidate {
            distance: dist,
            id: target,
        });
        cands.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let mut winners = self.diversity_select(cands, max_m)?;
        sort_descending(&mut winners);
        let dropped: Vec<NodeId> = src_neighbors
            .iter()
            .filter(|n| {
                let n_id = n.id;
                !winners.iter().any(|w| w.id == n_id)
            })
            .map(|n| n.id)
            .collect();
        let new_edge_dropped = !winners.iter().any(|w| w.id == target);

        {
            let page = self.pool().pin(source.blkno())?;
            let mut guard = page.write();
            let mut tup = TupleMut::new(guard.tuple_bytes_mut(source.offset(), size));
            let entries: Vec<Neighbor> = winners
                .iter()
                .map(|c| Neighbor {
                    id: c.id,
                    distance: c.distance,
                })
                .collect();
            tup.set_neighbors(&entries);
        }
        for victim in dropped {
            self.bump_in_degree(victim, -1)?;
        }
        if new_edge_dropped {
            self.bump_in_degree(target, -1)?;
        }
        Ok(())
    }
}
