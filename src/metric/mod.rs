//! Distance metrics.
//!
//! Three kinds are selectable at index creation (see
//! [`crate::options::IndexOptions::algorithm`]):
//!
//! - [`L2Squared`] — `Σ(xᵢ - yᵢ)²`
//! - [`InnerProduct`] — `1 - Σxᵢyᵢ` (lower is better)
//! - linear-custom — raw inner product passed through a scorer together
//!   with the target tuple's `bias` field
//!
//! The scalar kernels in [`scalar`] are the semantic reference; the
//! AVX2 kernels in [`simd`] must agree with them to within 1e-5
//! relative error.

/// Inner-product metric.
pub mod dot;
/// L2 squared metric.
pub mod l2;
/// Custom linear scoring.
pub mod linear;
/// Scalar reference kernels.
pub mod scalar;
/// SIMD kernels with scalar fallback.
pub mod simd;

pub use dot::InnerProduct;
pub use l2::L2Squared;
pub use linear::{default_scorer, Scorer};

use serde::{Deserialize, Serialize};

/// A distance function over fixed-dimensional dense vectors.
pub trait Metric<T> {
    /// Computes the distance between two vectors of equal length.
    fn distance(a: &[T], b: &[T]) -> f32;
}

/// Distance kind persisted in the meta record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum DistanceKind {
    /// `Σ(xᵢ - yᵢ)²`.
    L2 = 1,
    /// `1 - Σxᵢyᵢ`.
    InnerProduct = 2,
    /// `scorer(Σxᵢyᵢ, bias)`.
    Linear = 3,
}

impl DistanceKind {
    /// Decodes the numeric code stored in the meta record.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::L2),
            2 => Some(Self::InnerProduct),
            3 => Some(Self::Linear),
            _ => None,
        }
    }

    /// The numeric code stored in the meta record.
    #[must_use]
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Runtime distance dispatch for one open index.
///
/// Pairs the persisted [`DistanceKind`] with the process-local scorer
/// used by the linear kind.
#[derive(Clone, Copy)]
pub struct DistanceState {
    kind: DistanceKind,
    scorer: Scorer,
}

impl DistanceState {
    /// Creates the dispatch state for a kind with the default scorer.
    #[must_use]
    pub fn new(kind: DistanceKind) -> Self {
        Self {
            kind,
            scorer: default_scorer,
        }
    }

    /// Installs a custom linear scorer. Only consulted by
    /// [`DistanceKind::Linear`].
    #[must_use]
    pub fn with_scorer(kind: DistanceKind, scorer: Scorer) -> Self {
        Self { kind, scorer }
    }

    /// The persisted kind.
    #[must_use]
    pub fn kind(&self) -> DistanceKind {
        self.kind
    }

    /// Distance between two stored vectors, without bias scoring.
    ///
    /// This is the form used by the neighbor selection heuristic, which
    /// compares candidates against each other rather than against the
    /// query.
    #[must_use]
    pub fn pairwise(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.kind {
            DistanceKind::L2 => L2Squared::distance(a, b),
            DistanceKind::InnerProduct => InnerProduct::distance(a, b),
            DistanceKind::Linear => simd::inner_product(a, b),
        }
    }

    /// Distance from a query to a stored tuple, applying the linear
    /// scorer with the tuple's `bias` when the kind requires it.
    #[must_use]
    pub fn eval(&self, q: &[f32], x: &[f32], bias: f32) -> f32 {
        match self.kind {
            DistanceKind::L2 => L2Squared::distance(q, x),
            DistanceKind::InnerProduct => InnerProduct::distance(q, x),
            DistanceKind::Linear => (self.scorer)(simd::inner_product(q, x), bias),
        }
    }
}

impl std::fmt::Debug for DistanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistanceState")
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_roundtrip() {
        for kind in [
            DistanceKind::L2,
            DistanceKind::InnerProduct,
            DistanceKind::Linear,
        ] {
            assert_eq!(DistanceKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(DistanceKind::from_code(0), None);
        assert_eq!(DistanceKind::from_code(4), None);
    }

    #[test]
    fn eval_dispatch() {
        let a = [1.0, 2.0, 3.0];
        let b = [0.5, 1.0, -1.0];

        let l2 = DistanceState::new(DistanceKind::L2);
        assert!((l2.eval(&a, &b, 0.0) - 17.25).abs() < 1e-6);

        let dot = DistanceState::new(DistanceKind::InnerProduct);
        assert!((dot.eval(&a, &b, 0.0) - (1.0 - (-0.5))).abs() < 1e-6);

        // Default scorer ignores bias: score = s.
        let lin = DistanceState::new(DistanceKind::Linear);
        assert!((lin.eval(&a, &b, 42.0) - (-0.5)).abs() < 1e-6);

        let custom = DistanceState::with_scorer(DistanceKind::Linear, |s, bias| s + bias);
        assert!((custom.eval(&a, &b, 2.0) - 1.5).abs() < 1e-6);
    }
}
