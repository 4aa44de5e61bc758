//! Creation and build options.
//!
//! `IndexOptions` are frozen into the meta page at creation time;
//! `BuildOptions` steer a single bulk build. Every option carries a
//! documented range enforced by `validate()`.

use crate::error::{HnswError, Result};
use crate::metric::DistanceKind;
use serde::{Deserialize, Serialize};

/// Options frozen at index creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Base fan-out `M`: max links per node on levels above 0. Level 0
    /// allows `2 * M`. Range `[1, 64]`.
    pub m: u32,

    /// Construction beam width (`efbuild`). Range `[1, 500]`.
    pub ef_construction: u32,

    /// Vector dimensionality. Range `[1, 4096]`.
    pub dims: u32,

    /// Query beam width (`efsearch`). Range `[1, 1024]`.
    pub ef_search: u32,

    /// Distance algorithm: `"l2"`, `"dot"` or `"linear"`.
    pub algorithm: String,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 128,
            dims: 64,
            ef_search: 64,
            algorithm: "l2".to_owned(),
        }
    }
}

impl IndexOptions {
    /// Creates default options for the given dimensionality.
    #[must_use]
    pub fn new(dims: u32) -> Self {
        Self {
            dims,
            ..Self::default()
        }
    }

    /// Checks every option against its documented range.
    ///
    /// # Errors
    ///
    /// Returns `HnswError::InvalidOption` for an out-of-range value and
    /// `HnswError::BadAlgorithm` for an unknown algorithm string.
    pub fn validate(&self) -> Result<()> {
        range_check("m", self.m, 1, 64)?;
        range_check("efbuild", self.ef_construction, 1, 500)?;
        range_check("dims", self.dims, 1, 4096)?;
        range_check("efsearch", self.ef_search, 1, 1024)?;
        self.distance_kind()?;
        Ok(())
    }

    /// Resolves the algorithm string to a [`DistanceKind`].
    ///
    /// # Errors
    ///
    /// Returns `HnswError::BadAlgorithm` for anything but the three
    /// recognized codes.
    pub fn distance_kind(&self) -> Result<DistanceKind> {
        match self.algorithm.as_str() {
            "l2" => Ok(DistanceKind::L2),
            "dot" => Ok(DistanceKind::InnerProduct),
            "linear" => Ok(DistanceKind::Linear),
            other => Err(HnswError::BadAlgorithm(other.to_owned())),
        }
    }
}

/// Options for one bulk build.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Number of L0 workers for the two-phase parallel build. `0`
    /// selects the single-process sequential build. Range `[0, 20]`.
    pub parallel_workers: u32,
}

impl BuildOptions {
    /// Checks the worker count against its documented range.
    ///
    /// # Errors
    ///
    /// Returns `HnswError::InvalidOption` when `parallel_workers > 20`.
    pub fn validate(&self) -> Result<()> {
        range_check("index_parallel", self.parallel_workers, 0, 20)
    }
}

fn range_check(name: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if (min..=max).contains(&value) {
        return Ok(());
    }
    Err(HnswError::InvalidOption(format!(
        "{name} must be in [{min}, {max}], got {value}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reloptions() {
        let opts = IndexOptions::default();
        assert_eq!(opts.m, 16);
        assert_eq!(opts.ef_construction, 128);
        assert_eq!(opts.dims, 64);
        assert_eq!(opts.ef_search, 64);
        assert_eq!(opts.algorithm, "l2");
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range() {
        let mut opts = IndexOptions::new(128);
        opts.m = 65;
        assert!(matches!(opts.validate(), Err(HnswError::InvalidOption(_))));

        let mut opts = IndexOptions::new(128);
        opts.ef_construction = 501;
        assert!(opts.validate().is_err());

        let mut opts = IndexOptions::new(0);
        assert!(opts.validate().is_err());
        opts.dims = 4097;
        assert!(opts.validate().is_err());

        let mut opts = IndexOptions::new(128);
        opts.ef_search = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn algorithm_codes() {
        let mut opts = IndexOptions::new(8);
        assert_eq!(opts.distance_kind().unwrap(), DistanceKind::L2);
        opts.algorithm = "dot".into();
        assert_eq!(opts.distance_kind().unwrap(), DistanceKind::InnerProduct);
        opts.algorithm = "linear".into();
        assert_eq!(opts.distance_kind().unwrap(), DistanceKind::Linear);
        opts.algorithm = "cosine".into();
        assert!(matches!(
            opts.distance_kind(),
            Err(HnswError::BadAlgorithm(_))
        ));
    }

    #[test]
    fn build_worker_range() {
        assert!(BuildOptions::default().validate().is_ok());
        let opts = BuildOptions {
            parallel_workers: 21,
        };
        assert!(opts.validate().is_err());
    }
}
