//! Dense vector kernels on slices.

use crate::core::traits::Scalar;

/// y ← y + a·x
pub fn axpy<T: Scalar>(a: T, x: &[T], y: &mut [T]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi = *yi + a * xi;
    }
}

/// y ← x + b·y
pub fn xpay<T: Scalar>(x: &[T], b: T, y: &mut [T]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi = xi + b * *yi;
    }
}

/// x ← a·x
pub fn scale_by<T: Scalar>(a: T, x: &mut [T]) {
    for xi in x.iter_mut() {
        *xi = a * *xi;
    }
}

/// out ← x − y
pub fn sub<T: Scalar>(x: &[T], y: &[T], out: &mut [T]) {
    debug_assert_eq!(x.len(), y.len());
    debug_assert_eq!(x.len(), out.len());
    for ((oi, &xi), &yi) in out.iter_mut().zip(x).zip(y) {
        *oi = xi - yi;
    }
}

/// y ← x
pub fn copy<T: Scalar>(x: &[T], y: &mut [T]) {
    y.copy_from_slice(x);
}

/// Process-local dot product; reductions across ranks go through
/// [`InnerProduct`](crate::core::InnerProduct).
pub fn dot<T: Scalar>(x: &[T], y: &[T]) -> T {
    crate::core::wrappers::local_dot(x, y)
}

/// Euclidean norm of the whole slice, without any reduction.
pub fn norm2<T: Scalar>(x: &[T]) -> T {
    x.iter().fold(T::zero(), |acc, &xi| acc + xi * xi).sqrt()
}

/// v_i ← v_i · f_i
pub fn scale<T: Scalar>(v: &mut [T], factors: &[T]) {
    assert_eq!(v.len(), factors.len(), "scale factors must match the vector length");
    for (vi, &fi) in v.iter_mut().zip(factors) {
        *vi = *vi * fi;
    }
}

/// v_i ← v_i / f_i
pub fn unscale<T: Scalar>(v: &mut [T], factors: &[T]) {
    assert_eq!(v.len(), factors.len(), "scale factors must match the vector length");
    for (vi, &fi) in v.iter_mut().zip(factors) {
        *vi = *vi / fi;
    }
}

pub fn all_finite<T: Scalar>(x: &[T]) -> bool {
    x.iter().all(|v| v.is_finite())
}
