use thiserror::Error;

// Unified error type for krydd

#[derive(Error, Debug)]
pub enum KError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("parse error at line {line}: {msg}")]
    Parse { line: usize, msg: String },
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("entry ({row}, {col}) outside a {nrows}x{ncols} matrix")]
    EntryOutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },
    #[error("singular pivot in incomplete factorization at row {row}")]
    SingularPivot { row: usize },
    #[error("direct factorization failed: {0}")]
    FactorizationFailed(String),
    #[error("{method} breakdown at iteration {iteration}: {reason}")]
    Breakdown {
        method: &'static str,
        iteration: usize,
        reason: &'static str,
    },
    #[error("no convergence after {iterations} iterations (relative residual {relative_residual:e})")]
    NonConvergence {
        iterations: usize,
        relative_residual: f64,
    },
    #[error("collective mismatch: {0}")]
    CollectiveMismatch(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = KError> = std::result::Result<T, E>;
