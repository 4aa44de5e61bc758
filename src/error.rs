//! Unified error hierarchy for pagevec.
//!
//! Every fallible operation returns [`HnswError`]. Errors are never
//! retried internally; page pins and locks are released by scope on any
//! exit path, and the builder never commits a partially linked node.

use crate::tuple::NodeId;
use thiserror::Error;

/// The unified pagevec error type.
#[derive(Debug, Error)]
pub enum HnswError {
    /// Input/Output errors from the backing page file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Meta page magic mismatch on open: the file is not a pagevec index.
    #[error("relation is not an hnsw index")]
    NotAnIndex,

    /// Query or input tuple dimensionality differs from the meta record.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimMismatch {
        /// Dimensionality recorded in the meta page.
        expected: u32,
        /// Dimensionality of the offending vector.
        actual: u32,
    },

    /// Unrecognized `algorithm` creation option.
    #[error("bad algorithm {0:?}")]
    BadAlgorithm(String),

    /// A tuple could not be placed on a page that reported free space.
    #[error("failed to add index tuple to block {blkno}")]
    PageAddFailed {
        /// Block the placement was attempted on.
        blkno: u32,
    },

    /// A neighbor's out-degree exceeds its `maxM` bound (corruption).
    #[error("bad value of out_degree {out_degree} for node {node:?} (max {max})")]
    BadDegree {
        /// The corrupted node.
        node: NodeId,
        /// Observed out-degree.
        out_degree: u32,
        /// Allowed maximum.
        max: u32,
    },

    /// Attempt to link a node to itself.
    #[error("trying to connect an element to itself: {0:?}")]
    SelfLink(NodeId),

    /// Attempt to link nodes that reside on different levels.
    #[error("trying to make a link on a non-existent level: {left} vs {right}")]
    LevelMismatch {
        /// Level of the node being linked from.
        left: u32,
        /// Level of the link target.
        right: u32,
    },

    /// The host requested cancellation; the current arena was rolled back.
    #[error("operation interrupted")]
    Interrupted,

    /// A creation or build option is outside its documented range.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Page bytes that cannot be decoded (bad flags, truncated record).
    #[error("corrupted page data: {0}")]
    Corrupted(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HnswError>;
