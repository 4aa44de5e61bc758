//! The index handle: creation, opening, the process-local meta cache,
//! tuple access helpers and chain statistics.

use crate::error::{HnswError, Result};
use crate::metric::{DistanceKind, DistanceState, Scorer};
use crate::options::IndexOptions;
use crate::page::{
    BucketData, MetaPageData, F_BUCKET, F_META, INVALID_LEVEL, MAX_LEVEL, META_BLKNO,
};
use crate::page::meta::{HNSW_MAGIC, HNSW_VERSION};
use crate::storage::Pool;
use crate::tuple::{tuple_size, NodeId, TupleView};
use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// A disk-resident HNSW index.
///
/// All operations take `&self`; pages are shared across threads and
/// exclusive latches are taken only when mutating, so bulk-build
/// workers and online inserters can run concurrently.
pub struct HnswIndex {
    pool: Pool,
    meta_cache: RwLock<Option<MetaPageData>>,
    distance: DistanceState,
    link_nearest: AtomicBool,
    cancel: AtomicBool,
    pub(crate) rng: Mutex<ChaCha8Rng>,
}

impl HnswIndex {
    /// Creates a new index file: the meta page plus one bucket page per
    /// level, all fan-out and beam parameters frozen from `options`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption`/`BadAlgorithm` for bad options and
    /// propagates filesystem errors.
    pub fn create(path: &Path, options: &IndexOptions) -> Result<Self> {
        options.validate()?;
        let kind = options.distance_kind()?;

        let pool = Pool::create(path)?;

        let meta_page = pool.new_page()?;
        debug_assert_eq!(meta_page.blkno(), META_BLKNO);
        {
            let mut guard = meta_page.write();
            guard.init(F_META, INVALID_LEVEL as i16);
            *guard.meta_mut() = MetaPageData {
                magic: HNSW_MAGIC,
                version: HNSW_VERSION,
                dims: options.dims,
                m: options.m,
                m0: 2 * options.m,
                ef_construction: options.ef_construction,
                ef_search: options.ef_search,
                distance: kind.code(),
                max_level: INVALID_LEVEL,
                level_blk: [0; MAX_LEVEL],
            };
        }

        for level in 0..MAX_LEVEL {
            let bucket_page = pool.new_page()?;
            {
                let mut guard = bucket_page.write();
                guard.init(F_BUCKET, level as i16);
                *guard.bucket_mut() = BucketData::new(level as u32, options.dims);
            }
            meta_page.write().meta_mut().level_blk[level] = bucket_page.blkno();
        }

        let meta = *meta_page.read().meta();
        pool.flush()?;

        Ok(Self {
            pool,
            meta_cache: RwLock::new(Some(meta)),
            distance: DistanceState::new(kind),
            link_nearest: AtomicBool::new(kind == DistanceKind::Linear),
            cancel: AtomicBool::new(false),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(42)),
        })
    }

    /// Opens an existing index file.
    ///
    /// # Errors
    ///
    /// Returns `NotAnIndex` when block 0 is not a pagevec meta page.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_inner(path, None)
    }

    /// Opens an existing index, installing a custom scorer for the
    /// `linear` algorithm. The scorer is process-local; it is never
    /// persisted.
    ///
    /// # Errors
    ///
    /// Same as [`HnswIndex::open`].
    pub fn open_with_scorer(path: &Path, scorer: Scorer) -> Result<Self> {
        Self::open_inner(path, Some(scorer))
    }

    fn open_inner(path: &Path, scorer: Option<Scorer>) -> Result<Self> {
        let pool = Pool::open(path)?;
        let meta = {
            let page = pool.pin(META_BLKNO)?;
            let guard = page.read();
            if !guard.is_meta() {
                return Err(HnswError::NotAnIndex);
            }
            let meta = *guard.meta();
            if meta.magic != HNSW_MAGIC {
                return Err(HnswError::NotAnIndex);
            }
            meta
        };

        let kind = DistanceKind::from_code(meta.distance)
            .ok_or_else(|| HnswError::BadAlgorithm(format!("code {}", meta.distance)))?;
        let distance = match scorer {
            Some(f) => DistanceState::with_scorer(kind, f),
            None => DistanceState::new(kind),
        };

        Ok(Self {
            pool,
            meta_cache: RwLock::new(Some(meta)),
            distance,
            link_nearest: AtomicBool::new(kind == DistanceKind::Linear),
            cancel: AtomicBool::new(false),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(42)),
        })
    }

    /// Forces the simple nearest-neighbor link selection instead of
    /// the diversity heuristic. Always on for the `linear` algorithm.
    pub fn set_link_nearest(&self, on: bool) {
        self.link_nearest.store(on, Ordering::Release);
    }

    pub(crate) fn link_nearest(&self) -> bool {
        self.link_nearest.load(Ordering::Acquire)
    }

    /// Requests cancellation of long-running loops; they surface
    /// [`HnswError::Interrupted`] at the next page boundary.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Clears a previously requested cancellation.
    pub fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::Release);
    }

    pub(crate) fn check_interrupt(&self) -> Result<()> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(HnswError::Interrupted);
        }
        Ok(())
    }

    pub(crate) fn pool(&self) -> &Pool {
        &self.pool
    }

    pub(crate) fn distance(&self) -> &DistanceState {
        &self.distance
    }

    /// The cached meta record, re-read from block 0 when `refresh` is
    /// set (the start of every scan and explicit insert requests).
    pub(crate) fn cached_meta(&self, refresh: bool) -> Result<MetaPageData> {
        if !refresh {
            if let Some(meta) = *self.meta_cache.read() {
                return Ok(meta);
            }
        }

        let page = self.pool.pin(META_BLKNO)?;
        let meta = {
            let guard = page.read();
            if !guard.is_meta() || guard.meta().magic != HNSW_MAGIC {
                return Err(HnswError::NotAnIndex);
            }
            *guard.meta()
        };
        *self.meta_cache.write() = Some(meta);
        Ok(meta)
    }

    /// Raises the cached `max_level` without touching the page; the
    /// builder flushes it at the end via
    /// [`HnswIndex::update_meta_max_level`].
    pub(crate) fn bump_cached_max_level(&self, level: i32) {
        let mut cache = self.meta_cache.write();
        if let Some(meta) = cache.as_mut() {
            if meta.max_level < level {
                meta.max_level = level;
            }
        }
    }

    /// Writes a new `max_level` into the meta page.
    pub(crate) fn update_meta_max_level(&self, max_level: i32) -> Result<()> {
        log::info!("flush max level {max_level}");
        let page = self.pool.pin(META_BLKNO)?;
        page.write().meta_mut().max_level = max_level;
        self.bump_cached_max_level(max_level);
        Ok(())
    }

    /// The uniform tuple record size of this index.
    pub(crate) fn record_size(&self, meta: &MetaPageData) -> usize {
        tuple_size(meta.dims, meta.m)
    }

    /// Runs `f` over a read-only view of one tuple record. The view
    /// lives only as long as the page pin backing it.
    pub(crate) fn with_tuple<R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&TupleView<'_>) -> R,
    ) -> Result<R> {
        let meta = self.cached_meta(false)?;
        let size = self.record_size(&meta);
        let page = self.pool.pin(id.blkno())?;
        let guard = page.read();
        if id.offset() == 0 || id.offset() > guard.max_offset() {
            return Err(HnswError::Corrupted(format!(
                "tuple offset {:?} out of range (maxoff {})",
                id,
                guard.max_offset()
            )));
        }
        let view = TupleView::new(guard.tuple_bytes(id.offset(), size));
        Ok(f(&view))
    }

    /// Copies one tuple's vector out of its page.
    pub(crate) fn tuple_vector(&self, id: NodeId) -> Result<Vec<f32>> {
        self.with_tuple(id, |t| t.vector().to_vec())
    }

    /// Copies a bucket record out of its page.
    pub(crate) fn read_bucket(&self, blkno: u32) -> Result<BucketData> {
        let page = self.pool.pin(blkno)?;
        let guard = page.read();
        if !guard.is_bucket() {
            return Err(HnswError::Corrupted(format!(
                "block {blkno} is not a bucket page"
            )));
        }
        Ok(*guard.bucket())
    }

    /// Adjusts one tuple's advisory in-degree counter. Best-effort: the
    /// field is guarded only by the page latch.
    pub(crate) fn bump_in_degree(&self, id: NodeId, delta: i64) -> Result<()> {
        let meta = self.cached_meta(false)?;
        let size = self.record_size(&meta);
        let page = self.pool.pin(id.blkno())?;
        let mut guard = page.write();
        if id.offset() == 0 || id.offset() > guard.max_offset() {
            return Err(HnswError::Corrupted(format!(
                "tuple offset {id:?} out of range"
            )));
        }
        let mut tup = crate::tuple::TupleMut::new(guard.tuple_bytes_mut(id.offset(), size));
        let mut header = tup.header();
        header.in_degree = (i64::from(header.in_degree) + delta).max(0) as u32;
        tup.set_header(&header);
        Ok(())
    }

    /// Writes every dirty page back to the index file.
    ///
    /// # Errors
    ///
    /// Propagates filesystem errors.
    pub fn flush(&self) -> Result<()> {
        self.pool.flush()
    }

    /// Walks every level chain, validating the structural invariants
    /// and collecting per-level statistics.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted`, `BadDegree`, `SelfLink` or `LevelMismatch`
    /// when a structural invariant does not hold.
    pub fn stats(&self) -> Result<IndexStats> {
        let meta = self.cached_meta(true)?;
        let size = self.record_size(&meta);
        let mut levels = Vec::new();

        for level in 0..MAX_LEVEL as u32 {
            self.check_interrupt()?;
            let bucket_blk = meta.level_blk[level as usize];
            let bucket = self.read_bucket(bucket_blk)?;
            let mut stats = LevelStats {
                level,
                pages: 0,
                ntuples: 0,
                live_tuples: 0,
                deleted_tuples: 0,
                sum_out_degree: 0,
                sum_in_degree: 0,
            };

            let first = {
                let page = self.pool.pin(bucket_blk)?;
                let guard = page.read();
                guard.opaque().next_blkno
            };

            let mut prev = bucket_blk;
            let mut blkno = first;
            while blkno != crate::tuple::INVALID_BLOCK {
                self.check_interrupt()?;
                // Copy the page's records out under one shared latch;
                // neighbor tuples are read after it is released.
                let (next, records) = {
                    let page = self.pool.pin(blkno)?;
                    let guard = page.read();
                    if !guard.is_overflow() {
                        return Err(HnswError::Corrupted(format!(
                            "block {blkno} in level {level} chain is not an overflow page"
                        )));
                    }
                    let opaque = guard.opaque();
                    if opaque.level != level as i16 {
                        return Err(HnswError::Corrupted(format!(
                            "block {blkno} carries level {} in level {level} chain",
                            opaque.level
                        )));
                    }
                    if opaque.prev_blkno != prev {
                        return Err(HnswError::Corrupted(format!(
                            "block {blkno} back-pointer {} does not match {prev}",
                            opaque.prev_blkno
                        )));
                    }

                    let mut records = Vec::with_capacity(guard.max_offset() as usize);
                    for off in 1..=guard.max_offset() {
                        let view = TupleView::new(guard.tuple_bytes(off, size));
                        records.push((off, *view.header(), view.neighbors().to_vec()));
                    }
                    (opaque.next_blkno, records)
                };

                stats.pages += 1;
                for (off, header, neighbors) in records {
                    let self_id = NodeId::new(blkno, off);

                    if header.dims != meta.dims {
                        return Err(HnswError::DimMismatch {
                            expected: meta.dims,
                            actual: header.dims,
                        });
                    }
                    let expected_max = if level == 0 { meta.m0 } else { meta.m };
                    if header.max_m != expected_max || header.out_degree > header.max_m {
                        return Err(HnswError::BadDegree {
                            node: self_id,
                            out_degree: header.out_degree,
                            max: header.max_m,
                        });
                    }

                    stats.ntuples += 1;
                    if header.deleted != 0 {
                        stats.deleted_tuples += 1;
                    } else {
                        stats.live_tuples += 1;
                    }
                    stats.sum_out_degree += u64::from(header.out_degree);
                    stats.sum_in_degree += u64::from(header.in_degree);

                    for n in neighbors {
                        let n_id = n.id;
                        if n_id == self_id {
                            return Err(HnswError::SelfLink(self_id));
                        }
                        let n_level = self.with_tuple(n_id, |t| t.header().level)?;
                        if n_level != level {
                            return Err(HnswError::LevelMismatch {
                                left: level,
                                right: n_level,
                            });
                        }
                    }
                }

                prev = blkno;
                blkno = next;
            }

            if stats.pages != bucket.pages {
                return Err(HnswError::Corrupted(format!(
                    "level {level} chain has {} pages, bucket says {}",
                    stats.pages, bucket.pages
                )));
            }
            if stats.ntuples != u64::from(bucket.ntuples) {
                return Err(HnswError::Corrupted(format!(
                    "level {level} chain has {} tuples, bucket says {}",
                    stats.ntuples, bucket.ntuples
                )));
            }

            levels.push(stats);
        }

        Ok(IndexStats {
            max_level: meta.max_level,
            levels,
        })
    }
}

/// Per-level counters gathered by [`HnswIndex::stats`].
#[derive(Clone, Copy, Debug)]
pub struct LevelStats {
    /// The level.
    pub level: u32,
    /// Overflow pages chained from the bucket.
    pub pages: u32,
    /// Tuple records on the level.
    pub ntuples: u64,
    /// Records without a tombstone.
    pub live_tuples: u64,
    /// Tombstoned records.
    pub deleted_tuples: u64,
    /// Sum of live out-degrees.
    pub sum_out_degree: u64,
    /// Sum of advisory in-degrees.
    pub sum_in_degree: u64,
}

/// Chain statistics for a whole index.
#[derive(Clone, Debug)]
pub struct IndexStats {
    /// `max_level` from the meta record.
    pub max_level: i32,
    /// One entry per level, level 0 first.
    pub levels: Vec<LevelStats>,
}

impl IndexStats {
    /// Sum of out-degrees across all levels.
    #[must_use]
    pub fn total_out_degree(&self) -> u64 {
        self.levels.iter().map(|l| l.sum_out_degree).sum()
    }

    /// Sum of advisory in-degrees across all levels.
    #[must_use]
    pub fn total_in_degree(&self) -> u64 {
        self.levels.iter().map(|l| l.sum_in_degree).sum()
    }

    /// Total tuple records across all levels.
    #[must_use]
    pub fn total_tuples(&self) -> u64 {
        self.levels.iter().map(|l| l.ntuples).sum()
    }
}
