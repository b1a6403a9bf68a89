//! Preconditioners for linear solvers.
//!
//! This module defines the [`Preconditioner`] trait and the incomplete LU
//! factorization used by the solve pipeline.

use crate::error::KError;

/// A preconditioner M ≈ A⁻¹.
///
/// `apply` takes `&self`: a factored preconditioner is immutable, and the
/// `Send + Sync` bound lets one instance serve concurrent callers.
pub trait Preconditioner<T>: Send + Sync {
    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&self, r: &[T], z: &mut [T]) -> Result<(), KError>;
}

pub mod ilu;

pub use ilu::{Ilu, SparseRow};
