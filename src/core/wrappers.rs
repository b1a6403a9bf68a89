//! Process-local reductions.
//!
//! `()` is the inner product of a single process: plain Euclidean dot
//! products over the whole vector, no-op `sync`, and identity reductions.
//! With the `rayon` feature the dot product is evaluated in fixed-size
//! chunks whose partial sums are combined in chunk order, so the result does
//! not depend on how the work was scheduled.

use crate::core::traits::{InnerProduct, Scalar};

#[cfg(feature = "rayon")]
const DOT_CHUNK: usize = 4096;

impl<T: Scalar> InnerProduct<T> for () {
    fn dot(&self, x: &[T], y: &[T]) -> T {
        assert_eq!(x.len(), y.len(), "Vectors must have the same length");
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            if x.len() <= DOT_CHUNK {
                return local_dot(x, y);
            }
            let partial: Vec<T> = x
                .par_chunks(DOT_CHUNK)
                .zip(y.par_chunks(DOT_CHUNK))
                .map(|(xc, yc)| local_dot(xc, yc))
                .collect();
            partial.into_iter().fold(T::zero(), |acc, v| acc + v)
        }
        #[cfg(not(feature = "rayon"))]
        {
            local_dot(x, y)
        }
    }
}

/// Sequential dot product, left to right.
pub fn local_dot<T: Scalar>(x: &[T], y: &[T]) -> T {
    x.iter()
        .zip(y.iter())
        .fold(T::zero(), |acc, (&xi, &yi)| acc + xi * yi)
}
