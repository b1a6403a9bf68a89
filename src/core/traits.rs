//! Core linear-algebra traits for krydd.

use num_traits::{Float, FromPrimitive, ToPrimitive};
use std::fmt::Debug;

/// Scalar bound shared by every numeric kernel in the crate.
pub trait Scalar: Float + FromPrimitive + ToPrimitive + Debug + Send + Sync + 'static {}

impl<T> Scalar for T where T: Float + FromPrimitive + ToPrimitive + Debug + Send + Sync + 'static {}

/// Matrix–vector product: y ← A x.
pub trait MatVec<T> {
    /// Compute y = A · x.
    fn matvec(&self, x: &[T], y: &mut [T]);
}

/// Operator dimensions.
pub trait MatShape {
    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;
}

/// Reductions used inside the Krylov iteration.
///
/// Every dot product, norm and stopping decision of a solver goes through
/// this trait. The process-local implementation is `()`; the distributed one
/// is [`crate::domain::Coherence`], which counts each shared degree of
/// freedom exactly once and keeps halo entries consistent with their owners.
pub trait InnerProduct<T: Scalar> {
    /// Compute dot(x, y) over the degrees of freedom this process owns,
    /// reduced across every participant.
    fn dot(&self, x: &[T], y: &[T]) -> T;

    /// Compute ‖x‖₂.
    fn norm(&self, x: &[T]) -> T {
        self.dot(x, x).sqrt()
    }

    /// Overwrite shared entries of `v` with the owner's values.
    fn sync(&self, _v: &mut [T]) {}

    /// True on every participant iff `flag` is true on every participant.
    fn all_true(&self, flag: bool) -> bool {
        flag
    }

    /// Maximum of `value` over every participant.
    fn global_max(&self, value: T) -> T {
        value
    }

    /// Dimension of the global problem a local vector of `local_len` belongs to.
    fn global_dim(&self, local_len: usize) -> usize {
        local_len
    }
}
