//! Solve contexts.
//!
//! - [`ksp_context`]: [`Ksp`], one Krylov method bound to an operator.
//! - [`pipeline`]: scaling, ILU and Krylov in the order a run needs them.
//! - [`orchestrator`]: dispatch between the direct, local and decomposed
//!   paths, plus the per-run report.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems. SIAM.
//! - PETSc documentation: https://petsc.org/release/docs/manualpages/KSP/

pub mod ksp_context;
pub mod orchestrator;
pub mod pipeline;

pub use ksp_context::Ksp;
pub use orchestrator::{Orchestrator, ResidualReport, SolveReport};
pub use pipeline::{solve_local, LocalOutcome, Stages};
