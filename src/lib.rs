//! krydd: scaled, ILU-preconditioned Krylov and sparse direct solvers with
//! a domain-decomposition driver.
//!
//! A run is one call to [`Orchestrator::run`] on every rank of a
//! [`parallel::Comm`]. Depending on the [`SolverConfig`] it either factors
//! the global matrix with the faer-backed [`LuSolver`] on rank 0, or runs
//! the iterative pipeline (equilibration, ILU(k, τ), then GMRES, BiCGSTAB
//! or BiCGSafe) on the whole system or on each rank's subdomain, and hands
//! every rank the same reconciled solution.
//!
//! ```rust
//! use krydd::{CsrMatrix, Method, Orchestrator, SolverConfig};
//! use krydd::parallel::SerialComm;
//!
//! let mut a = CsrMatrix::from_triplets(3, 3, &[
//!     (0, 0, 4.0), (0, 1, -1.0),
//!     (1, 0, -1.0), (1, 1, 4.0), (1, 2, -1.0),
//!     (2, 1, -1.0), (2, 2, 4.0),
//! ]).unwrap();
//! let mut b = vec![3.0, 2.0, 3.0];
//! let mut x = vec![0.0; 3];
//! let cfg = SolverConfig::new(Method::BiCgStab).with_preconditioning(true);
//! let report = Orchestrator::new(cfg, &SerialComm).run(&mut a, &mut x, &mut b).unwrap();
//! assert!(report.converged());
//! ```

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod domain;
pub mod error;
pub mod matrix;
pub mod preconditioner;
pub mod scaling;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::{KrylovKind, LuOptions, Method, SolverConfig};
pub use context::{Ksp, Orchestrator, ResidualReport, SolveReport, Stages};
pub use crate::core::{InnerProduct, MatShape, MatVec, Scalar};
pub use error::KError;
pub use matrix::{read_matrix_market, read_vector, CsrMatrix};
pub use preconditioner::{Ilu, Preconditioner};
pub use scaling::{normalize, Normalized, ScalingDiagnostics, ScalingState};
pub use solver::{BiCgSafeSolver, BiCgStabSolver, DirectSolver, GmresSolver, LinearSolver, LuSolver};
pub use utils::convergence::{Outcome, SolveStats};
pub use utils::timing::PhaseTimes;
