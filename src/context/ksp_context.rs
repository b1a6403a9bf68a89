//! Krylov subspace solver context (KSP).
//!
//! [`Ksp`] binds one Krylov method to an operator, a right-hand side, an
//! optional preconditioner and an optional coherence handle. Construction
//! does no work; the stopping policy is adjusted with
//! [`Ksp::iteration_cap`] and [`Ksp::relative_residual_threshold`], each of
//! which returns the previous value, and [`Ksp::solve`] iterates in place
//! from the caller's initial guess.
//!
//! # Example
//! ```rust
//! use krydd::{CsrMatrix, KrylovKind, Ksp};
//!
//! let t = [(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)];
//! let a = CsrMatrix::from_triplets(2, 2, &t).unwrap();
//! let b = vec![1.0, 2.0];
//! let mut x = vec![0.0; 2];
//! let mut ksp = Ksp::new(KrylovKind::Gmres, &a, &b);
//! ksp.relative_residual_threshold(1e-12);
//! let stats = ksp.solve(&mut x).unwrap();
//! assert!(stats.converged());
//! ```
//!
//! # References
//! - PETSc documentation: https://petsc.org/release/docs/manualpages/KSP/

use crate::config::KrylovKind;
use crate::core::traits::{InnerProduct, MatShape, MatVec, Scalar};
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::solver::{BiCgSafeSolver, BiCgStabSolver, GmresSolver, KrylovSystem, LinearSolver};
use crate::utils::convergence::{cast, Convergence, SolveStats};

const DEFAULT_RESTART: usize = 50;
const DEFAULT_THRESHOLD: f64 = 1e-8;
const DEFAULT_BREAKDOWN: f64 = 1e-16;

/// A configured Krylov solve of A x = b.
pub struct Ksp<'a, M: ?Sized, T: Scalar> {
    kind: KrylovKind,
    solver: Box<dyn LinearSolver<M, T>>,
    restart: usize,
    breakdown_threshold: T,
    a: &'a M,
    b: &'a [T],
    pc: Option<&'a dyn Preconditioner<T>>,
    ip: &'a dyn InnerProduct<T>,
}

fn build<M, T>(
    kind: KrylovKind,
    conv: Convergence<T>,
    restart: usize,
    breakdown: T,
) -> Box<dyn LinearSolver<M, T>>
where
    M: MatVec<T> + ?Sized,
    T: Scalar,
{
    match kind {
        KrylovKind::Gmres => Box::new(GmresSolver::new(restart, conv.tol, conv.max_iters)),
        KrylovKind::BiCgStab => {
            Box::new(
                BiCgStabSolver::new(conv.tol, conv.max_iters).with_breakdown_threshold(breakdown),
            )
        }
        KrylovKind::BiCgSafe => {
            Box::new(
                BiCgSafeSolver::new(conv.tol, conv.max_iters).with_breakdown_threshold(breakdown),
            )
        }
    }
}

impl<'a, M, T> Ksp<'a, M, T>
where
    M: MatVec<T> + MatShape + ?Sized,
    T: Scalar,
{
    /// The iteration cap defaults to one fifth of the row count (at least
    /// one) and the threshold to 1e-8.
    pub fn new(kind: KrylovKind, a: &'a M, b: &'a [T]) -> Self {
        let conv = Convergence::new(cast(DEFAULT_THRESHOLD), (a.nrows() / 5).max(1));
        let breakdown_threshold = cast(DEFAULT_BREAKDOWN);
        Self {
            kind,
            solver: build(kind, conv, DEFAULT_RESTART, breakdown_threshold),
            restart: DEFAULT_RESTART,
            breakdown_threshold,
            a,
            b,
            pc: None,
            ip: &(),
        }
    }

    pub fn with_preconditioner(mut self, pc: Option<&'a dyn Preconditioner<T>>) -> Self {
        self.pc = pc;
        self
    }

    /// Route every reduction of the iteration through `ip`.
    pub fn with_coherence(mut self, ip: &'a dyn InnerProduct<T>) -> Self {
        self.ip = ip;
        self
    }

    /// GMRES restart length; ignored by the other methods.
    pub fn with_restart(mut self, restart: usize) -> Self {
        self.restart = restart.max(1);
        self.rebuild();
        self
    }

    pub fn with_breakdown_threshold(mut self, threshold: T) -> Self {
        self.breakdown_threshold = threshold;
        self.rebuild();
        self
    }

    fn rebuild(&mut self) {
        let conv = *self.solver.convergence();
        self.solver = build(self.kind, conv, self.restart, self.breakdown_threshold);
    }

    /// Set the iteration cap (restart cycles for GMRES); returns the old cap.
    pub fn iteration_cap(&mut self, n: usize) -> usize {
        std::mem::replace(&mut self.solver.convergence_mut().max_iters, n)
    }

    /// Set the relative residual threshold; returns the old threshold.
    pub fn relative_residual_threshold(&mut self, eps: T) -> T {
        std::mem::replace(&mut self.solver.convergence_mut().tol, eps)
    }

    pub fn kind(&self) -> KrylovKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.solver.name()
    }

    /// Solve in place from the current contents of `x`.
    ///
    /// Non-convergence and breakdown are reported in the returned
    /// [`SolveStats`]; `x` then holds the best available iterate.
    pub fn solve(&mut self, x: &mut [T]) -> Result<SolveStats<T>, KError> {
        let n = x.len();
        if self.a.ncols() != n {
            return Err(KError::DimensionMismatch { expected: self.a.ncols(), found: n });
        }
        if self.b.len() != self.a.nrows() {
            return Err(KError::DimensionMismatch { expected: self.a.nrows(), found: self.b.len() });
        }
        let _span = tracing::debug_span!("ksp_solve", method = self.solver.name(), n).entered();
        let sys = KrylovSystem::new(self.a, self.b)
            .with_preconditioner(self.pc)
            .with_inner_product(self.ip);
        self.solver.solve(&sys, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;
    use crate::preconditioner::Ilu;
    use crate::utils::convergence::Outcome;
    use approx::assert_abs_diff_eq;

    fn system() -> (CsrMatrix<f64>, Vec<f64>) {
        let n = 20;
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 5.0));
            if i > 0 {
                t.push((i, i - 1, -2.0));
            }
            if i + 1 < n {
                t.push((i, i + 1, -1.0));
            }
        }
        (CsrMatrix::from_triplets(n, n, &t).unwrap(), vec![1.0; n])
    }

    #[test]
    fn setters_return_previous_values() {
        let (a, b) = system();
        let mut ksp = Ksp::new(KrylovKind::BiCgStab, &a, &b);
        assert_eq!(ksp.iteration_cap(7), 4);
        assert_eq!(ksp.iteration_cap(9), 7);
        assert_eq!(ksp.relative_residual_threshold(1e-10), 1e-8);
        assert_eq!(ksp.relative_residual_threshold(1e-6), 1e-10);
        assert_eq!(ksp.name(), "bicgstab");
    }

    #[test]
    fn every_kind_solves_with_ilu() {
        let (a, b) = system();
        let ilu = Ilu::factorize(&a, 1, 1e-8).unwrap();
        for kind in [KrylovKind::Gmres, KrylovKind::BiCgStab, KrylovKind::BiCgSafe] {
            let mut x = vec![0.0; 20];
            let mut ksp = Ksp::new(kind, &a, &b).with_preconditioner(Some(&ilu));
            ksp.iteration_cap(50);
            ksp.relative_residual_threshold(1e-10);
            let stats = ksp.solve(&mut x).unwrap();
            assert!(stats.converged(), "{kind}: {stats:?}");
            let mut r = vec![0.0; 20];
            a.residual(&x, &b, &mut r);
            let r_norm = r.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert_abs_diff_eq!(r_norm, stats.final_residual, epsilon = 1e-12);
        }
    }

    #[test]
    fn settings_survive_restart_change() {
        let (a, b) = system();
        let mut ksp = Ksp::new(KrylovKind::Gmres, &a, &b);
        ksp.iteration_cap(1);
        let mut ksp = ksp.with_restart(2);
        assert_eq!(ksp.iteration_cap(1), 1);
        let mut x = vec![0.0; 20];
        let stats = ksp.solve(&mut x).unwrap();
        assert_eq!(stats.outcome, Outcome::MaxIterReached);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let (a, b) = system();
        let mut x = vec![0.0; 3];
        let res = Ksp::new(KrylovKind::Gmres, &a, &b).solve(&mut x);
        assert!(matches!(res, Err(KError::DimensionMismatch { .. })));
    }
}
