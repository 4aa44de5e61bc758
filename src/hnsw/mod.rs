//! The HNSW graph: index handle, build driver, search, scan, delete.

mod build;
mod index;
mod insert;
mod parallel;
mod scan;
mod search;
mod vacuum;
mod visited;

pub use build::BuildStats;
pub use index::{HnswIndex, IndexStats, LevelStats};
pub use insert::IndexEntry;
pub use scan::{IndexScan, ScanHit};
pub use vacuum::{DeleteStats, VacuumStats};
