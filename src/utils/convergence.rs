//! Convergence tracking & tolerance checks for iterative solvers.

use crate::core::traits::Scalar;
use crate::error::KError;

/// Below this a norm counts as zero.
pub const TRIVIAL_NORM: f64 = 1e-50;

/// Absolute residual that counts as converged regardless of ‖r₀‖.
pub const ABSOLUTE_THRESHOLD: f64 = 1e-30;

/// Stopping criteria.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Convergence<T> {
    /// Relative residual threshold ‖r‖/‖r₀‖.
    pub tol: T,
    pub max_iters: usize,
}

impl<T: Scalar> Convergence<T> {
    pub fn new(tol: T, max_iters: usize) -> Self {
        Self { tol, max_iters }
    }

    /// True when `res_norm` meets the relative or the absolute threshold.
    pub fn reached(&self, res_norm: T, res0_norm: T) -> bool {
        res_norm <= self.tol * res0_norm || res_norm <= cast(ABSOLUTE_THRESHOLD)
    }
}

pub(crate) fn cast<T: Scalar>(v: f64) -> T {
    T::from_f64(v).unwrap_or_else(T::zero)
}

pub(crate) fn is_trivial<T: Scalar>(v: T) -> bool {
    v.abs() <= cast(TRIVIAL_NORM)
}

/// Breakdown details reported by a bi-orthogonal method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakdownInfo {
    pub method: &'static str,
    pub iteration: usize,
    pub reason: &'static str,
}

/// Terminal state of a solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Converged,
    MaxIterReached,
    Breakdown(BreakdownInfo),
}

/// Result of a solve. `x` always holds the best available iterate, and
/// `final_residual` is ‖b − Ax‖ of that iterate.
#[derive(Clone, Debug)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub initial_residual: T,
    pub final_residual: T,
    pub outcome: Outcome,
}

impl<T: Scalar> SolveStats<T> {
    pub fn converged(&self) -> bool {
        self.outcome == Outcome::Converged
    }

    /// ‖r‖/‖r₀‖, or zero when the initial residual was already zero.
    pub fn relative_residual(&self) -> T {
        if is_trivial(self.initial_residual) {
            T::zero()
        } else {
            self.final_residual / self.initial_residual
        }
    }

    /// Turn a non-converged outcome into the matching error.
    pub fn check(self) -> Result<Self, KError> {
        match self.outcome {
            Outcome::Converged => Ok(self),
            Outcome::MaxIterReached => Err(KError::NonConvergence {
                iterations: self.iterations,
                relative_residual: self.relative_residual().to_f64().unwrap_or(f64::NAN),
            }),
            Outcome::Breakdown(info) => Err(KError::Breakdown {
                method: info.method,
                iteration: info.iteration,
                reason: info.reason,
            }),
        }
    }
}
