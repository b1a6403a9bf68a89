//! Sparse direct solver backed by faer's sparse LU.
//!
//! [`LuSolver`] factors once and then solves any number of right-hand sides
//! against the stored factors. Each solve is followed by a few rounds of
//! iterative refinement against the original matrix, and the refined
//! solution must pass a normwise backward-error test before it is accepted;
//! a factorization that cannot produce such a solution is reported as
//! [`KError::FactorizationFailed`].
//!
//! # References
//! - Faer documentation: https://github.com/sarah-ek/faer-rs
//! - Higham, N. (2002). Accuracy and Stability of Numerical Algorithms,
//!   §12 (iterative refinement).

use crate::config::LuOptions;
use crate::core::vector::{all_finite, norm2};
use crate::error::KError;
use crate::matrix::CsrMatrix;
use crate::parallel::Comm;
use crate::utils::timing::{timed, PhaseTimes};
use faer::prelude::*;
use faer::sparse::linalg::solvers::Lu;

/// Factor-once, solve-many interface of a direct engine.
pub trait DirectSolver {
    /// Compute the factorization. Must be called before [`DirectSolver::solve`].
    fn factor(&mut self) -> Result<(), KError>;

    /// Solve A x = b with the stored factors, which are left unchanged.
    fn solve(&self, b: &[f64], x: &mut [f64]) -> Result<(), KError>;
}

/// Sparse LU over a borrowed CSR matrix.
pub struct LuSolver<'a> {
    a: &'a CsrMatrix<f64>,
    options: LuOptions,
    lu: Option<Lu<usize, f64>>,
}

impl<'a> LuSolver<'a> {
    pub fn new(a: &'a CsrMatrix<f64>) -> Self {
        Self::with_options(a, LuOptions::default())
    }

    pub fn with_options(a: &'a CsrMatrix<f64>, options: LuOptions) -> Self {
        Self { a, options, lu: None }
    }

    pub fn options(&self) -> &LuOptions {
        &self.options
    }

    pub fn is_factored(&self) -> bool {
        self.lu.is_some()
    }

    /// Reject rows and columns whose largest entry is below `pivot_static`.
    fn check_static_pivots(&self) -> Result<(), KError> {
        let n = self.a.nrows();
        let mut col_max = vec![0.0f64; n];
        for i in 0..n {
            let mut row_max = 0.0f64;
            for (j, v) in self.a.row(i) {
                row_max = row_max.max(v.abs());
                col_max[j] = col_max[j].max(v.abs());
            }
            if row_max < self.options.pivot_static {
                return Err(KError::FactorizationFailed(format!("row {i} is structurally empty")));
            }
        }
        if let Some(j) = col_max.iter().position(|&m| m < self.options.pivot_static) {
            return Err(KError::FactorizationFailed(format!("column {j} is structurally empty")));
        }
        Ok(())
    }

    fn apply_factors(lu: &Lu<usize, f64>, rhs: &[f64], out: &mut [f64]) {
        let n = rhs.len();
        let sol = lu.solve(faer::Mat::<f64>::from_fn(n, 1, |i, _| rhs[i]));
        for (i, oi) in out.iter_mut().enumerate() {
            *oi = sol[(i, 0)];
        }
    }
}

impl DirectSolver for LuSolver<'_> {
    fn factor(&mut self) -> Result<(), KError> {
        let n = self.a.nrows();
        if self.a.ncols() != n {
            return Err(KError::DimensionMismatch { expected: n, found: self.a.ncols() });
        }
        let _span = tracing::debug_span!("lu_factor", n, nnz = self.a.nnz()).entered();
        self.lu = None;
        self.check_static_pivots()?;
        let a_sp = self.a.to_faer()?;
        let lu = a_sp
            .sp_lu()
            .map_err(|e| {
                KError::FactorizationFailed(format!("sparse LU factorization failed: {e:?}"))
            })?;
        if self.options.verbosity >= 1 {
            tracing::debug!(n, nnz = self.a.nnz(), "sparse LU factorization ready");
        }
        if self.options.verbosity >= 2 {
            tracing::debug!(options = ?self.options, "sparse LU options");
        }
        self.lu = Some(lu);
        Ok(())
    }

    fn solve(&self, b: &[f64], x: &mut [f64]) -> Result<(), KError> {
        let n = self.a.nrows();
        let lu = self
            .lu
            .as_ref()
            .ok_or_else(|| KError::FactorizationFailed("solve called before factor".into()))?;
        if b.len() != n {
            return Err(KError::DimensionMismatch { expected: n, found: b.len() });
        }
        if x.len() != n {
            return Err(KError::DimensionMismatch { expected: n, found: x.len() });
        }
        if n == 0 {
            return Ok(());
        }

        Self::apply_factors(lu, b, x);
        if !all_finite(x) {
            return Err(KError::FactorizationFailed(
                "sparse LU produced a non-finite solution".into(),
            ));
        }

        let mut r = vec![0.0; n];
        let mut d = vec![0.0; n];
        for step in 0..self.options.refinement_steps {
            self.a.residual(x, b, &mut r);
            Self::apply_factors(lu, &r, &mut d);
            if !all_finite(&d) {
                return Err(KError::FactorizationFailed("iterative refinement diverged".into()));
            }
            for (xi, di) in x.iter_mut().zip(&d) {
                *xi += di;
            }
            let (dn, xn) = (norm2(&d), norm2(x));
            if self.options.verbosity >= 2 {
                tracing::debug!(step, correction = dn, "refinement step");
            }
            if dn <= f64::EPSILON * xn {
                break;
            }
        }

        // normwise backward error ‖b − Ax‖ / (‖A‖∞ ‖x‖∞ + ‖b‖∞)
        self.a.residual(x, b, &mut r);
        let inf = |v: &[f64]| v.iter().fold(0.0f64, |m, e| m.max(e.abs()));
        let a_inf = (0..n)
            .map(|i| self.a.row_vals(i).iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0f64, f64::max);
        let scale = a_inf * inf(x) + inf(b);
        let backward = if scale > 0.0 { inf(&r) / scale } else { 0.0 };
        if !backward.is_finite() || backward > self.options.pivot_quality {
            return Err(KError::FactorizationFailed(format!(
                "matrix is numerically singular (backward error {backward:e})"
            )));
        }
        if self.options.verbosity >= 2 {
            tracing::debug!(backward_error = backward, "sparse LU solve accepted");
        }
        Ok(())
    }
}

/// Solve A x = b on rank 0 and hand the result to every rank.
///
/// The failure flag is reduced so every rank returns the same outcome, and
/// the solution travels as the sum of a vector that is zero everywhere except
/// on rank 0. Ranks other than 0 only need `x` sized; `a` and `b` are read on
/// rank 0 alone. The returned times are zero off the root.
pub fn solve_on_root<C: Comm + ?Sized>(
    a: &CsrMatrix<f64>,
    b: &[f64],
    x: &mut [f64],
    options: LuOptions,
    comm: &C,
) -> Result<PhaseTimes, KError> {
    let mut outcome: Result<(), KError> = Ok(());
    let mut times = PhaseTimes::default();
    if comm.is_root() {
        let mut lu = LuSolver::with_options(a, options);
        let (factored, factorization) = timed(|| lu.factor());
        times.factorization = factorization;
        outcome = factored.and_then(|_| {
            let (solved, iteration) = timed(|| lu.solve(b, x));
            times.iteration = iteration;
            solved
        });
    }
    if !comm.all_true(outcome.is_ok()) {
        return Err(outcome.err().unwrap_or_else(|| {
            KError::FactorizationFailed("sparse LU failed on rank 0".into())
        }));
    }
    if !comm.is_root() {
        x.iter_mut().for_each(|v| *v = 0.0);
    }
    comm.all_reduce_sum_vec(x);
    Ok(times)
}
