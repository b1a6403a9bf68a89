//! Generalized Minimal Residual (GMRES) solver with fixed restart (Saad §6.4)
//!
//! Right-preconditioned restarted GMRES for nonsymmetric systems. Each cycle
//! builds an orthonormal basis of the Krylov space of A·M⁻¹ with modified
//! Gram–Schmidt, reduces the Hessenberg matrix with Givens rotations, and
//! updates x with M⁻¹ applied to the basis combination. The iteration cap
//! counts restart cycles; after every cycle the true residual is recomputed
//! and decides convergence.
//!
//! The restart length is clamped to the global problem size. When the basis
//! can no longer be extended (happy breakdown) the cycle ends early with the
//! least-squares solution over the exhausted space; the true residual then
//! either confirms convergence or the method restarts from the improved x.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §6.4
//! - https://en.wikipedia.org/wiki/Generalized_minimal_residual_method

use crate::core::traits::{MatVec, Scalar};
use crate::core::vector::{all_finite, axpy};
use crate::error::KError;
use crate::solver::{KrylovSystem, LinearSolver};
use crate::utils::convergence::{cast, is_trivial, BreakdownInfo, Convergence, Outcome, SolveStats};

/// GMRES solver struct with restart options.
///
/// # Type Parameters
/// * `T` - Scalar type (e.g., f32, f64)
pub struct GmresSolver<T> {
    /// Number of Arnoldi vectors before restart
    pub restart: usize,
    /// Convergence criteria; `max_iters` counts restart cycles
    pub conv: Convergence<T>,
}

impl<T: Scalar> GmresSolver<T> {
    pub fn new(restart: usize, tol: T, max_iters: usize) -> Self {
        Self { restart: restart.max(1), conv: Convergence { tol, max_iters } }
    }

    /// Apply the previous rotations to column `j` of `h`, then build and
    /// apply the rotation that annihilates h[j+1][j], updating `g` with it.
    fn apply_givens_and_update_g(
        h: &mut [Vec<T>],
        g: &mut [T],
        cs: &mut [T],
        sn: &mut [T],
        j: usize,
    ) {
        for i in 0..j {
            let temp = cs[i] * h[i][j] + sn[i] * h[i + 1][j];
            h[i + 1][j] = -sn[i] * h[i][j] + cs[i] * h[i + 1][j];
            h[i][j] = temp;
        }
        let h_kk = h[j][j];
        let h_k1k = h[j + 1][j];
        let r = h_kk.hypot(h_k1k);
        if is_trivial(r) {
            cs[j] = T::one();
            sn[j] = T::zero();
        } else {
            cs[j] = h_kk / r;
            sn[j] = h_k1k / r;
        }
        h[j][j] = cs[j] * h_kk + sn[j] * h_k1k;
        h[j + 1][j] = T::zero();
        let temp = cs[j] * g[j] + sn[j] * g[j + 1];
        g[j + 1] = -sn[j] * g[j] + cs[j] * g[j + 1];
        g[j] = temp;
    }

    /// Solve the m×m upper-triangular system H y = g; zero pivots yield zero components.
    fn back_substitution(h: &[Vec<T>], g: &[T], y: &mut [T], m: usize) {
        for i in (0..m).rev() {
            let mut s = g[i];
            for j in (i + 1)..m {
                s = s - h[i][j] * y[j];
            }
            y[i] = if is_trivial(h[i][i]) { T::zero() } else { s / h[i][i] };
        }
    }
}

impl<M, T> LinearSolver<M, T> for GmresSolver<T>
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
        let _span = tracing::debug_span!("gmres", n, restart = self.restart).entered();

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

        let m = self.restart.min(ip.global_dim(n)).max(1);
        let happy_tol = cast::<T>(1e-14);
        let mut beta = res0;
        let mut w = vec![T::zero(); n];

        for cycle in 1..=self.conv.max_iters {
            stats.iterations = cycle;
            let mut v_basis: Vec<Vec<T>> = Vec::with_capacity(m + 1);
            let mut z_basis: Vec<Vec<T>> = Vec::with_capacity(m);
            v_basis.push(r.iter().map(|&ri| ri / beta).collect());

            let mut h = vec![vec![T::zero(); m]; m + 1];
            let mut g = vec![T::zero(); m + 1];
            g[0] = beta;
            let mut cs = vec![T::zero(); m];
            let mut sn = vec![T::zero(); m];
            let mut k = 0;

            for j in 0..m {
                let mut z = vec![T::zero(); n];
                sys.precondition(&v_basis[j], &mut z)?;
                sys.apply_op(&z, &mut w);
                z_basis.push(z);
                let w_norm = ip.norm(&w);
                // Modified Gram-Schmidt
                for i in 0..=j {
                    h[i][j] = ip.dot(&w, &v_basis[i]);
                    axpy(-h[i][j], &v_basis[i], &mut w);
                }
                h[j + 1][j] = ip.norm(&w);
                let happy = h[j + 1][j] <= happy_tol * w_norm;
                if !happy {
                    let inv = T::one() / h[j + 1][j];
                    v_basis.push(w.iter().map(|&wi| wi * inv).collect());
                }
                Self::apply_givens_and_update_g(&mut h, &mut g, &mut cs, &mut sn, j);
                k = j + 1;
                let estimate = g[j + 1].abs();
                if ip.all_true(happy || self.conv.reached(estimate, res0)) {
                    break;
                }
            }

            let mut y = vec![T::zero(); k];
            Self::back_substitution(&h, &g, &mut y, k);
            if !y.iter().all(|v| v.is_finite()) {
                stats.final_residual = sys.true_residual_norm(x);
                stats.outcome = Outcome::Breakdown(BreakdownInfo {
                    method: "gmres",
                    iteration: cycle,
                    reason: "non-finite least-squares solution",
                });
                tracing::warn!(cycle, "GMRES least-squares solution is not finite");
                return Ok(stats);
            }
            for (yj, zj) in y.iter().zip(&z_basis) {
                axpy(*yj, zj, x);
            }

            sys.residual(x, &mut r);
            beta = ip.norm(&r);
            stats.final_residual = beta;
            tracing::debug!(cycle, basis = k, residual = ?beta, "GMRES cycle finished");

            if !ip.all_true(beta.is_finite() && all_finite(x)) {
                stats.outcome = Outcome::Breakdown(BreakdownInfo {
                    method: "gmres",
                    iteration: cycle,
                    reason: "non-finite residual",
                });
                tracing::warn!(cycle, "GMRES residual is not finite");
                return Ok(stats);
            }
            if ip.all_true(self.conv.reached(beta, res0)) {
                stats.outcome = Outcome::Converged;
                tracing::debug!(iterations = cycle, "GMRES converged");
                return Ok(stats);
            }
        }
        tracing::warn!(
            cycles = stats.iterations,
            residual = ?stats.final_residual,
            "GMRES reached the iteration cap"
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
        "gmres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preconditioner::Ilu;
    use crate::solver::test_support::{convection_diffusion, tridiag_system};
    use approx::assert_abs_diff_eq;

    #[test]
    fn gmres_solves_tridiagonal_in_one_cycle() {
        let (a, x_true, b) = tridiag_system(10);
        let mut x = vec![0.0; 10];
        let mut solver = GmresSolver::new(50, 1e-10, 2);
        let stats = solver.solve(&KrylovSystem::new(&a, &b), &mut x).unwrap();
        assert!(stats.converged(), "GMRES did not converge: {stats:?}");
        assert_eq!(stats.iterations, 1);
        for (xi, ei) in x.iter().zip(&x_true) {
            assert_abs_diff_eq!(xi, ei, epsilon = 1e-8);
        }
    }

    #[test]
    fn restarted_gmres_with_ilu() {
        let a = convection_diffusion(8);
        let n = a.nrows();
        let b = vec![1.0; n];
        let ilu = Ilu::factorize(&a, 0, 0.0).unwrap();
        let mut x = vec![0.0; n];
        let mut solver = GmresSolver::new(5, 1e-10, 200);
        let sys = KrylovSystem::new(&a, &b).with_preconditioner(Some(&ilu));
        let stats = solver.solve(&sys, &mut x).unwrap();
        assert!(stats.converged(), "{stats:?}");
        assert!(stats.relative_residual() <= 1e-10);
        assert_abs_diff_eq!(sys.true_residual_norm(&x), stats.final_residual, epsilon = 1e-14);
    }

    #[test]
    fn zero_rhs_gives_zero_solution() {
        let (a, _, _) = tridiag_system(4);
        let b = vec![0.0; 4];
        let mut x = vec![3.0; 4];
        let stats = GmresSolver::new(10, 1e-8, 5)
            .solve(&KrylovSystem::new(&a, &b), &mut x)
            .unwrap();
        assert!(stats.converged());
        assert_eq!(stats.iterations, 0);
        assert_eq!(x, vec![0.0; 4]);
    }

    #[test]
    fn cap_of_one_cycle_reports_true_residual() {
        let a = convection_diffusion(10);
        let n = a.nrows();
        let b = vec![1.0; n];
        let mut x = vec![0.0; n];
        let mut solver = GmresSolver::new(3, 1e-12, 1);
        let sys = KrylovSystem::new(&a, &b);
        let stats = solver.solve(&sys, &mut x).unwrap();
        assert_eq!(stats.outcome, Outcome::MaxIterReached);
        assert!(x.iter().any(|&v| v != 0.0));
        assert!(stats.final_residual < stats.initial_residual);
        assert_abs_diff_eq!(sys.true_residual_norm(&x), stats.final_residual, epsilon = 1e-14);
    }
}
