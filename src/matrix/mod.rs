//! Sparse matrix storage and readers.

pub mod market;
pub mod sparse;

pub use market::{read_matrix_market, read_vector};
pub use sparse::CsrMatrix;
