#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// Function pointer signature for high-speed distance computation.
pub type SimdFunc = unsafe fn(*const f32, *const f32, usize) -> f32;

/// Reference dot product.
///
/// # Safety
/// `a` and `b` must be valid for `n` reads.
pub unsafe fn scalar_dot(a: *const f32, b: *const f32, n: usize) -> f32 {
    let mut acc = 0.0f32;
    for i in 0..n {
        acc += (*a.add(i)) * (*b.add(i));
    }
    acc
}

/// Reference squared Euclidean distance.
///
/// # Safety
/// `a` and `b` must be valid for `n` reads.
pub unsafe fn scalar_l2_squared(a: *const f32, b: *const f32, n: usize) -> f32 {
    let mut acc = 0.0f32;
    for i in 0..n {
        let d = (*a.add(i)) - (*b.add(i));
        acc += d * d;
    }
    acc
}

#[cfg(target_arch = "x86_64")]
#[inline]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn horizontal_sum(acc: __m256) -> f32 {
    let upper = _mm256_extractf128_ps(acc, 1);
    let lower = _mm256_castps256_ps128(acc);
    let sum128 = _mm_add_ps(upper, lower);
    let sum_h = _mm_hadd_ps(sum128, sum128);
    _mm_cvtss_f32(_mm_hadd_ps(sum_h, sum_h))
}

/// AVX2 dot product, four 8-lane FMA accumulators.
///
/// # Safety
/// Caller must have verified `avx2` and `fma` support; `a` and `b` must be
/// valid for `n` reads.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
pub unsafe fn avx2_dot(a: *const f32, b: *const f32, n: usize) -> f32 {
    let mut acc0 = _mm256_setzero_ps();
    let mut acc1 = _mm256_setzero_ps();
    let mut acc2 = _mm256_setzero_ps();
    let mut acc3 = _mm256_setzero_ps();

    let mut i = 0;
    while i + 32 <= n {
        acc0 = _mm256_fmadd_ps(_mm256_loadu_ps(a.add(i)), _mm256_loadu_ps(b.add(i)), acc0);
        acc1 = _mm256_fmadd_ps(_mm256_loadu_ps(a.add(i + 8)), _mm256_loadu_ps(b.add(i + 8)), acc1);
        acc2 = _mm256_fmadd_ps(_mm256_loadu_ps(a.add(i + 16)), _mm256_loadu_ps(b.add(i + 16)), acc2);
        acc3 = _mm256_fmadd_ps(_mm256_loadu_ps(a.add(i + 24)), _mm256_loadu_ps(b.add(i + 24)), acc3);
        i += 32;
    }
    while i + 8 <= n {
        acc0 = _mm256_fmadd_ps(_mm256_loadu_ps(a.add(i)), _mm256_loadu_ps(b.add(i)), acc0);
        i += 8;
    }

    acc0 = _mm256_add_ps(acc0, acc1);
    acc2 = _mm256_add_ps(acc2, acc3);
    let mut result = horizontal_sum(_mm256_add_ps(acc0, acc2));

    while i < n {
        result += (*a.add(i)) * (*b.add(i));
        i += 1;
    }
    result
}

/// AVX2 squared Euclidean distance. Identical inputs produce exactly 0.0,
/// which self-recall relies on.
///
/// # Safety
/// Same contract as [`avx2_dot`].
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
pub unsafe fn avx2_l2_squared(a: *const f32, b: *const f32, n: usize) -> f32 {
    let mut acc0 = _mm256_setzero_ps();
    let mut acc1 = _mm256_setzero_ps();

    let mut i = 0;
    while i + 16 <= n {
        let d0 = _mm256_sub_ps(_mm256_loadu_ps(a.add(i)), _mm256_loadu_ps(b.add(i)));
        let d1 = _mm256_sub_ps(_mm256_loadu_ps(a.add(i + 8)), _mm256_loadu_ps(b.add(i + 8)));
        acc0 = _mm256_fmadd_ps(d0, d0, acc0);
        acc1 = _mm256_fmadd_ps(d1, d1, acc1);
        i += 16;
    }
    while i + 8 <= n {
        let d = _mm256_sub_ps(_mm256_loadu_ps(a.add(i)), _mm256_loadu_ps(b.add(i)));
        acc0 = _mm256_fmadd_ps(d, d, acc0);
        i += 8;
    }

    let mut result = horizontal_sum(_mm256_add_ps(acc0, acc1));
    while i < n {
        let d = (*a.add(i)) - (*b.add(i));
        result += d * d;
        i += 1;
    }
    result
}

/// Picks the fastest dot-product kernel for this CPU.
pub fn get_dot_kernel() -> SimdFunc {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return avx2_dot;
        }
    }
    scalar_dot
}

/// Picks the fastest squared-L2 kernel for this CPU.
pub fn get_l2_kernel() -> SimdFunc {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return avx2_l2_squared;
        }
    }
    scalar_l2_squared
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product_equivalence() {
        let n = 100;
        let a = vec![1.1f32; n];
        let b = vec![2.2f32; n];

        unsafe {
            let ref_res = scalar_dot(a.as_ptr(), b.as_ptr(), n);
            let kernel_res = get_dot_kernel()(a.as_ptr(), b.as_ptr(), n);
            let diff = (ref_res - kernel_res).abs();
            // FMA and summation order differ, 1e-3 absorbs it
            assert!(diff < 1e-3, "SIMD ({}) and Scalar ({}) mismatch by {}", kernel_res, ref_res, diff);
        }
    }

    #[test]
    fn test_l2_equivalence_and_exact_zero() {
        let n = 131;
        let a: Vec<f32> = (0..n).map(|i| (i as f32 * 0.37).sin()).collect();
        let b: Vec<f32> = (0..n).map(|i| (i as f32 * 0.11).cos()).collect();

        unsafe {
            let ref_res = scalar_l2_squared(a.as_ptr(), b.as_ptr(), n);
            let kernel_res = get_l2_kernel()(a.as_ptr(), b.as_ptr(), n);
            assert!((ref_res - kernel_res).abs() < 1e-3);
            assert_eq!(get_l2_kernel()(a.as_ptr(), a.as_ptr(), n), 0.0);
        }
    }
}
