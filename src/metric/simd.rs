//! SIMD distance kernels with scalar fallback.
//!
//! The scalar forms in [`super::scalar`] are the semantic reference;
//! the AVX2 kernels here must agree with them to within 1e-5 relative
//! error on random inputs.
//!
//! # Safety
//!
//! The `_mm256_loadu_*` intrinsics handle unaligned loads, so the
//! kernels accept any slice.

#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::missing_panics_doc)]

/// AVX2 implementations.
#[cfg(all(target_arch = "x86_64", target_feature = "avx2"))]
pub mod x86 {
    use std::arch::x86_64::*;

    #[inline]
    unsafe fn hsum256(v: __m256) -> f32 {
        let lo = _mm256_castps256_ps128(v);
        let hi = _mm256_extractf128_ps(v, 1);
        let sum128 = _mm_add_ps(lo, hi);
        let shuf = _mm_movehl_ps(sum128, sum128);
        let sum64 = _mm_add_ps(sum128, shuf);
        let shuf32 = _mm_shuffle_ps(sum64, sum64, 0x1);
        _mm_cvtss_f32(_mm_add_ss(sum64, shuf32))
    }

    /// L2 squared distance using AVX2.
    #[inline]
    #[must_use]
    pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(a.len(), b.len());
        unsafe {
            let n = a.len();
            let mut i = 0;
            let mut sum256 = _mm256_setzero_ps();

            // 8 floats per iteration
            while i + 8 <= n {
                let va = _mm256_loadu_ps(a.as_ptr().add(i));
                let vb = _mm256_loadu_ps(b.as_ptr().add(i));
                let diff = _mm256_sub_ps(va, vb);
                sum256 = _mm256_add_ps(sum256, _mm256_mul_ps(diff, diff));
                i += 8;
            }

            let mut sum = hsum256(sum256);

            // Scalar tail
            while i < n {
                let diff = *a.get_unchecked(i) - *b.get_unchecked(i);
                sum += diff * diff;
                i += 1;
            }
            sum
        }
    }

    /// Inner product using AVX2.
    #[inline]
    #[must_use]
    pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(a.len(), b.len());
        unsafe {
            let n = a.len();
            let mut i = 0;
            let mut sum256 = _mm256_setzero_ps();

            while i + 8 <= n {
                let va = _mm256_loadu_ps(a.as_ptr().add(i));
                let vb = _mm256_loadu_ps(b.as_ptr().add(i));
                sum256 = _mm256_add_ps(sum256, _mm256_mul_ps(va, vb));
                i += 8;
            }

            let mut sum = hsum256(sum256);

            while i < n {
                sum += *a.get_unchecked(i) * *b.get_unchecked(i);
                i += 1;
            }
            sum
        }
    }
}

/// L2 squared distance, dispatching to the fastest available kernel.
#[inline]
#[must_use]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    cfg_if::cfg_if! {
        if #[cfg(all(target_arch = "x86_64", target_feature = "avx2"))] {
            // SIMD overhead exceeds the gain for short vectors.
            if a.len() < 8 {
                return super::scalar::l2_squared_ref(a, b);
            }
            x86::l2_squared(a, b)
        } else {
            super::scalar::l2_squared_ref(a, b)
        }
    }
}

/// Inner product, dispatching to the fastest available kernel.
#[inline]
#[must_use]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    cfg_if::cfg_if! {
        if #[cfg(all(target_arch = "x86_64", target_feature = "avx2"))] {
            if a.len() < 8 {
                return super::scalar::inner_product_ref(a, b);
            }
            x86::inner_product(a, b)
        } else {
            super::scalar::inner_product_ref(a, b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::scalar::{inner_product_ref, l2_squared_ref};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_pair(dims: usize, seed: u64) -> (Vec<f32>, Vec<f32>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let a: Vec<f32> = (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let b: Vec<f32> = (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect();
        (a, b)
    }

    fn relative_err(x: f32, y: f32) -> f32 {
        (x - y).abs() / y.abs().max(1.0)
    }

    #[test]
    fn kernels_agree_with_reference() {
        for seed in 0..32 {
            for dims in [1, 3, 7, 8, 16, 127, 128, 129] {
                let (a, b) = random_pair(dims, seed);
                assert!(
                    relative_err(l2_squared(&a, &b), l2_squared_ref(&a, &b)) < 1e-5,
                    "l2 disagrees at dims={dims} seed={seed}"
                );
                assert!(
                    relative_err(inner_product(&a, &b), inner_product_ref(&a, &b)) < 1e-5,
                    "dot disagrees at dims={dims} seed={seed}"
                );
            }
        }
    }
}
