//! # pagevec
//!
//! A disk-resident Hierarchical Navigable Small World (HNSW) index for
//! approximate nearest-neighbor search over fixed-dimensional dense
//! float vectors.
//!
//! The graph is persisted on 32 KiB pages: a meta page, one bucket page
//! per level, and chained overflow pages holding fixed-size tuple
//! records with inline neighbor arrays. Builds run sequentially or in
//! two phases with a parallel level-0 worker pool; queries run a lazy
//! `first`/`next` scan; deletion is tombstone-based with a vacuum pass
//! returning empty pages to the free list.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pagevec::{BuildOptions, HeapPointer, HnswIndex, IndexEntry, IndexOptions};
//!
//! # fn main() -> Result<(), pagevec::HnswError> {
//! let options = IndexOptions {
//!     dims: 128,
//!     m: 16,
//!     ..IndexOptions::default()
//! };
//! let index = HnswIndex::create(std::path::Path::new("vectors.pv"), &options)?;
//!
//! let entries = (0..1000u64).map(|i| {
//!     IndexEntry::new(HeapPointer(i), vec![0.5; 128])
//! });
//! index.build(entries, &BuildOptions { parallel_workers: 4 })?;
//!
//! let query = vec![0.5; 128];
//! let mut scan = index.begin_scan(&query, 0.0, 10);
//! while let Some(hit) = scan.next()? {
//!     println!("{:?} at {}", hit.heap_ptr, hit.distance);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]

/// Unified error handling.
pub mod error;

/// The HNSW graph implementation.
pub mod hnsw;

/// Distance metrics.
pub mod metric;

/// Creation and build options.
pub mod options;

/// On-disk page layout.
pub mod page;

/// The buffer pool over the backing page file.
pub mod storage;

/// Tuple record codec.
pub mod tuple;

pub use error::HnswError;
pub use hnsw::{
    BuildStats, DeleteStats, HnswIndex, IndexEntry, IndexScan, IndexStats, LevelStats, ScanHit,
    VacuumStats,
};
pub use metric::{DistanceKind, Scorer};
pub use options::{BuildOptions, IndexOptions};
pub use tuple::{HeapPointer, NodeId};

/// The crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
