//! Core traits, reductions and vector kernels.

pub mod traits;
pub mod vector;
pub mod wrappers;

pub use traits::{InnerProduct, MatShape, MatVec, Scalar};
