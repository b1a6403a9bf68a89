//! Run configuration.

pub mod options;

pub use options::{KrylovKind, LuOptions, Method, SolverConfig};
