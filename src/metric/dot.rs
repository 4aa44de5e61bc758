//! Inner-product distance metric.

use super::Metric;

/// Inner-product metric.
///
/// Calculates `1 - sum(a_i * b_i)` so that lower is better, matching
/// the ordering convention of the other metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct InnerProduct;

impl Metric<f32> for InnerProduct {
    #[inline]
    fn distance(a: &[f32], b: &[f32]) -> f32 {
        1.0 - super::simd::inner_product(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_vectors_score_lowest() {
        let q = [1.0, 0.0];
        let near = [1.0, 0.0];
        let far = [-1.0, 0.0];
        assert!(InnerProduct::distance(&q, &near) < InnerProduct::distance(&q, &far));
        assert!((InnerProduct::distance(&q, &near) - 0.0).abs() < 1e-6);
        assert!((InnerProduct::distance(&q, &far) - 2.0).abs() < 1e-6);
    }
}
