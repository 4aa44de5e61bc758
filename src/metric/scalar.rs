//! Scalar reference implementations for distance kernels.
//!
//! These are the semantic specification for the SIMD variants in
//! [`super::simd`].

/// L2 squared distance, scalar reference form.
///
/// # Panics
///
/// Panics if `a` and `b` have different lengths.
#[inline]
#[must_use]
pub fn l2_squared_ref(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(
        a.len(),
        b.len(),
        "dimension mismatch: {} != {}",
        a.len(),
        b.len()
    );
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = x - y;
        sum += diff * diff;
    }
    sum
}

/// Inner product, scalar reference form.
///
/// # Panics
///
/// Panics if `a` and `b` have different lengths.
#[inline]
#[must_use]
pub fn inner_product_ref(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(
        a.len(),
        b.len(),
        "dimension mismatch: {} != {}",
        a.len(),
        b.len()
    );
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += x * y;
    }
    sum
}
