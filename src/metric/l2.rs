//! L2 squared distance metric.

use super::Metric;

/// L2 squared (Euclidean squared) distance.
///
/// Calculates `sum((a_i - b_i)^2)`. The square root is skipped since
/// squared distances preserve ordering and are cheaper to compute.
#[derive(Debug, Clone, Copy, Default)]
pub struct L2Squared;

impl Metric<f32> for L2Squared {
    #[inline]
    fn distance(a: &[f32], b: &[f32]) -> f32 {
        super::simd::l2_squared(a, b)
    }
}
