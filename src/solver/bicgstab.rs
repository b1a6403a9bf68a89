//! BiCGStab solver (Saad §7.1)
//!
//! Right-preconditioned: the search directions are mapped through M⁻¹
//! before each product with A, so the recurrence tracks the true residual of
//! the unpreconditioned system. A vanishing bi-orthogonality denominator,
//! measured as √|den| / ‖r₀‖ against the breakdown threshold, or a zero
//! stabilization weight ends the solve with a `Breakdown` outcome and the
//! current iterate.
//!
//! When the recurred residual meets the tolerance, the true residual is
//! checked as well; if it disagrees the method restarts from the current
//! iterate instead of reporting a convergence that did not happen.

use crate::core::traits::{MatVec, Scalar};
use crate::core::vector::{all_finite, axpy};
use crate::error::KError;
use crate::solver::{KrylovSystem, LinearSolver};
use crate::utils::convergence::{cast, is_trivial, BreakdownInfo, Convergence, Outcome, SolveStats};

pub struct BiCgStabSolver<T> {
    pub conv: Convergence<T>,
    /// Threshold on √|den| / ‖r₀‖ below which a denominator counts as zero.
    pub breakdown_threshold: T,
}

impl<T: Scalar> BiCgStabSolver<T> {
    pub fn new(tol: T, max_iters: usize) -> Self {
        Self { conv: Convergence { tol, max_iters }, breakdown_threshold: cast(1e-16) }
    }

    pub fn with_breakdown_threshold(mut self, thres: T) -> Self {
        self.breakdown_threshold = thres;
        self
    }

    fn vanishes(&self, den: T, res0: T) -> bool {
        !den.is_finite() || den.abs().sqrt() / res0 <= self.breakdown_threshold
    }
}

impl<M, T> LinearSolver<M, T> for BiCgStabSolver<T>
where
    M: MatVec<T> + ?Sized,
    T: Scalar,
{
    fn solve(
        &mut self,
        sys: &KrylovSystem<'_, M, T>,
        x: &mut [T],
    ) -> Result<SolveStats<T>, KError> {
        let n = x.len();
        let ip = sys.ip;
        let _span = tracing::debug_span!("bicgstab", n).entered();

        if ip.all_true(is_trivial(ip.norm(sys.b))) {
            x.iter_mut().for_each(|v| *v = T::zero());
            return Ok(SolveStats {
                iterations: 0,
                initial_residual: T::zero(),
                final_residual: T::zero(),
                outcome: Outcome::Converged,
            });
        }

        let mut r = vec![T::zero(); n];
        sys.residual(x, &mut r);
        let res0 = ip.norm(&r);
        let mut stats = SolveStats {
            iterations: 0,
            initial_residual: res0,
            final_residual: res0,
            outcome: Outcome::MaxIterReached,
        };
        if ip.all_true(is_trivial(res0)) {
            stats.outcome = Outcome::Converged;
            return Ok(stats);
        }

        let mut r_hat = r.clone();
        let mut p = vec![T::zero(); n];
        let mut v = vec![T::zero(); n];
        let mut p_hat = vec![T::zero(); n];
        let mut s = vec![T::zero(); n];
        let mut s_hat = vec![T::zero(); n];
        let mut t = vec![T::zero(); n];
        let mut rho_prev = T::one();
        let mut alpha = T::one();
        let mut omega = T::one();
        let mut fresh = true;

        let breakdown = |stats: &mut SolveStats<T>,
                         x: &[T],
                         iteration: usize,
                         reason: &'static str| {
            stats.final_residual = sys.true_residual_norm(x);
            stats.outcome =
                Outcome::Breakdown(BreakdownInfo { method: "bicgstab", iteration, reason });
            tracing::warn!(iteration, reason, "BiCGStab breakdown");
        };

        for i in 1..=self.conv.max_iters {
            stats.iterations = i;
            let rho = ip.dot(&r_hat, &r);
            if ip.all_true(self.vanishes(rho, res0)) {
                breakdown(&mut stats, x, i, "(r̂, r) vanished");
                return Ok(stats);
            }
            if fresh {
                p.copy_from_slice(&r);
                fresh = false;
            } else {
                let beta = (rho / rho_prev) * (alpha / omega);
                // p = r + beta * (p - omega * v)
                for ((pj, &rj), &vj) in p.iter_mut().zip(&r).zip(&v) {
                    *pj = rj + beta * (*pj - omega * vj);
                }
            }
            sys.precondition(&p, &mut p_hat)?;
            sys.apply_op(&p_hat, &mut v);
            let den = ip.dot(&r_hat, &v);
            if ip.all_true(self.vanishes(den, res0)) {
                breakdown(&mut stats, x, i, "(r̂, A M⁻¹ p) vanished");
                return Ok(stats);
            }
            alpha = rho / den;
            // s = r - alpha * v
            for ((sj, &rj), &vj) in s.iter_mut().zip(&r).zip(&v) {
                *sj = rj - alpha * vj;
            }
            let s_norm = ip.norm(&s);
            if ip.all_true(self.conv.reached(s_norm, res0)) {
                axpy(alpha, &p_hat, x);
                sys.residual(x, &mut r);
                let res = ip.norm(&r);
                stats.final_residual = res;
                if ip.all_true(self.conv.reached(res, res0)) {
                    stats.outcome = Outcome::Converged;
                    tracing::debug!(iterations = i, "BiCGStab converged");
                    return Ok(stats);
                }
                r_hat.copy_from_slice(&r);
                rho_prev = T::one();
                fresh = true;
                continue;
            }
            sys.precondition(&s, &mut s_hat)?;
            sys.apply_op(&s_hat, &mut t);
            let tt = ip.dot(&t, &t);
            let ts = ip.dot(&t, &s);
            if ip.all_true(is_trivial(tt)) {
                breakdown(&mut stats, x, i, "‖A M⁻¹ s‖ vanished");
                return Ok(stats);
            }
            omega = ts / tt;
            if ip.all_true(is_trivial(omega) || !omega.is_finite()) {
                axpy(alpha, &p_hat, x);
                breakdown(&mut stats, x, i, "stabilization weight vanished");
                return Ok(stats);
            }
            // x = x + alpha * p_hat + omega * s_hat
            for ((xj, &pj), &sj) in x.iter_mut().zip(&p_hat).zip(&s_hat) {
                *xj = *xj + alpha * pj + omega * sj;
            }
            // r = s - omega * t
            for ((rj, &sj), &tj) in r.iter_mut().zip(&s).zip(&t) {
                *rj = sj - omega * tj;
            }
            let r_norm = ip.norm(&r);
            stats.final_residual = r_norm;
            if !ip.all_true(r_norm.is_finite() && all_finite(x)) {
                stats.outcome = Outcome::Breakdown(BreakdownInfo {
                    method: "bicgstab",
                    iteration: i,
                    reason: "non-finite residual",
                });
                tracing::warn!(iteration = i, "BiCGStab residual is not finite");
                return Ok(stats);
            }
            if ip.all_true(self.conv.reached(r_norm, res0)) {
                sys.residual(x, &mut r);
                let res = ip.norm(&r);
                stats.final_residual = res;
                if ip.all_true(self.conv.reached(res, res0)) {
                    stats.outcome = Outcome::Converged;
                    tracing::debug!(iterations = i, "BiCGStab converged");
                    return Ok(stats);
                }
                r_hat.copy_from_slice(&r);
                rho_prev = T::one();
                fresh = true;
                continue;
            }
            rho_prev = rho;
        }
        stats.final_residual = sys.true_residual_norm(x);
        tracing::warn!(
            iterations = stats.iterations,
            residual = ?stats.final_residual,
            "BiCGStab reached the iteration cap"
        );
        Ok(stats)
    }

    fn convergence(&self) -> &Convergence<T> {
        &self.conv
    }

    fn convergence_mut(&mut self) -> &mut Convergence<T> {
        &mut self.conv
    }

    fn name(&self) -> &'static str {
        "bicgstab"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;
    use crate::preconditioner::Ilu;
    use crate::solver::test_support::{convection_diffusion, tridiag_system};
    use approx::assert_abs_diff_eq;

    #[test]
    fn bicgstab_solves_well_conditioned_nonsym() {
        let a = convection_diffusion(6);
        let n = a.nrows();
        let x_true: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).sin()).collect();
        let mut b = vec![0.0; n];
        a.spmv(&x_true, &mut b);
        let mut x = vec![0.0; n];
        let mut solver = BiCgStabSolver::new(1e-12, 200);
        let stats = solver.solve(&KrylovSystem::new(&a, &b), &mut x).unwrap();
        assert!(stats.converged(), "BiCGStab did not converge: stats = {stats:?}");
        for i in 0..n {
            assert_abs_diff_eq!(x[i], x_true[i], epsilon = 1e-8);
        }
    }

    #[test]
    fn exact_preconditioner_converges_in_one_iteration() {
        let (a, x_true, b) = tridiag_system(10);
        let ilu = Ilu::factorize(&a, 1, 1e-8).unwrap();
        let mut x = vec![0.0; 10];
        let mut solver = BiCgStabSolver::new(1e-8, 2);
        let sys = KrylovSystem::new(&a, &b).with_preconditioner(Some(&ilu));
        let stats = solver.solve(&sys, &mut x).unwrap();
        assert!(stats.converged());
        assert_eq!(stats.iterations, 1);
        for (xi, ei) in x.iter().zip(&x_true) {
            assert_abs_diff_eq!(xi, ei, epsilon = 1e-10);
        }
    }

    #[test]
    fn skew_system_reports_breakdown() {
        // (r0, A r0) = 0 for a skew-symmetric A, so the first denominator vanishes
        let a = CsrMatrix::from_triplets(2, 2, &[(0, 1, 1.0), (1, 0, -1.0)]).unwrap();
        let b = vec![1.0, 0.0];
        let mut x = vec![0.0; 2];
        let stats = BiCgStabSolver::new(1e-10, 10)
            .solve(&KrylovSystem::new(&a, &b), &mut x)
            .unwrap();
        match stats.outcome {
            Outcome::Breakdown(info) => {
                assert_eq!(info.method, "bicgstab");
                assert_eq!(info.iteration, 1);
            }
            other => panic!("expected breakdown, got {other:?}"),
        }
        assert!(matches!(stats.check(), Err(KError::Breakdown { .. })));
    }
}
