//! BiCGSafe solver
//!
//! A product-type Bi-CG variant whose stabilization polynomial is built from
//! two parameters (ζ, η) chosen each step to minimize the next residual over
//! the span of the two most recent update directions. It is typically more
//! robust than BiCGStab on strongly nonsymmetric systems at one extra
//! preconditioner application per iteration.
//!
//! Right-preconditioned. Where the recurrence would divide by a vanishing
//! quantity, the solve stops with a `Breakdown` outcome and keeps the current
//! iterate. Convergence is confirmed on the true residual; a disagreeing
//! recurred residual triggers a restart from the current iterate.
//!
//! # References
//! - Fujino, S., Fujiwara, M., Yoshida, M. (2005). BiCGSafe method based on
//!   minimization of associate residual. JSCES 2005.

use crate::core::traits::{MatVec, Scalar};
use crate::core::vector::all_finite;
use crate::error::KError;
use crate::solver::{KrylovSystem, LinearSolver};
use crate::utils::convergence::{cast, is_trivial, BreakdownInfo, Convergence, Outcome, SolveStats};

pub struct BiCgSafeSolver<T> {
    pub conv: Convergence<T>,
    pub breakdown_threshold: T,
}

/// Recurrence vectors of one BiCGSafe run.
struct State<T> {
    r: Vec<T>,
    r_shadow: Vec<T>,
    r_pc: Vec<T>,
    p: Vec<T>,
    ap: Vec<T>,
    v: Vec<T>,
    u: Vec<T>,
    au: Vec<T>,
    y: Vec<T>,
    z: Vec<T>,
}

impl<T: Scalar> BiCgSafeSolver<T> {
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

    /// Start (or restart) the recurrence from the residual stored in `st.r`.
    /// Returns α, ζ or the reason the start failed.
    fn start<M: MatVec<T> + ?Sized>(
        &self,
        sys: &KrylovSystem<'_, M, T>,
        st: &mut State<T>,
        res0: T,
    ) -> Result<Result<(T, T), &'static str>, KError> {
        let ip = sys.ip;
        st.r_shadow.copy_from_slice(&st.r);
        sys.precondition(&st.r, &mut st.r_pc)?;
        st.p.copy_from_slice(&st.r_pc);
        sys.apply_op(&st.r_pc, &mut st.v);
        st.ap.copy_from_slice(&st.v);
        for buf in [&mut st.u, &mut st.au, &mut st.y, &mut st.z] {
            buf.iter_mut().for_each(|e| *e = T::zero());
        }
        let den = ip.dot(&st.r_shadow, &st.ap);
        if ip.all_true(self.vanishes(den, res0)) {
            return Ok(Err("(r̂, A p) vanished"));
        }
        let alpha = ip.dot(&st.r_shadow, &st.r) / den;
        let vv = ip.dot(&st.v, &st.v);
        if ip.all_true(is_trivial(vv)) {
            return Ok(Err("‖A M⁻¹ r‖ vanished"));
        }
        let zeta = ip.dot(&st.v, &st.r) / vv;
        Ok(Ok((alpha, zeta)))
    }
}

impl<M, T> LinearSolver<M, T> for BiCgSafeSolver<T>
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
        let _span = tracing::debug_span!("bicgsafe", n).entered();

        if ip.all_true(is_trivial(ip.norm(sys.b))) {
            x.iter_mut().for_each(|v| *v = T::zero());
            return Ok(SolveStats {
                iterations: 0,
                initial_residual: T::zero(),
                final_residual: T::zero(),
                outcome: Outcome::Converged,
            });
        }

        let zeros = || vec![T::zero(); n];
        let mut st = State {
            r: zeros(),
            r_shadow: zeros(),
            r_pc: zeros(),
            p: zeros(),
            ap: zeros(),
            v: zeros(),
            u: zeros(),
            au: zeros(),
            y: zeros(),
            z: zeros(),
        };
        sys.residual(x, &mut st.r);
        let res0 = ip.norm(&st.r);
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

        let breakdown = |stats: &mut SolveStats<T>,
                         x: &[T],
                         iteration: usize,
                         reason: &'static str| {
            stats.final_residual = sys.true_residual_norm(x);
            stats.outcome =
                Outcome::Breakdown(BreakdownInfo { method: "bicgsafe", iteration, reason });
            tracing::warn!(iteration, reason, "BiCGSafe breakdown");
        };

        let (mut alpha, mut zeta) = match self.start(sys, &mut st, res0)? {
            Ok(params) => params,
            Err(reason) => {
                breakdown(&mut stats, x, 1, reason);
                return Ok(stats);
            }
        };
        let mut eta = T::zero();
        let mut beta = T::zero();
        let mut w = zeros();
        let mut q = zeros();
        let mut r_new = zeros();

        for i in 1..=self.conv.max_iters {
            stats.iterations = i;

            // u = M⁻¹(ζ A p + η y) + η β u
            for ((qj, &apj), &yj) in q.iter_mut().zip(&st.ap).zip(&st.y) {
                *qj = zeta * apj + eta * yj;
            }
            sys.precondition(&q, &mut w)?;
            let eb = eta * beta;
            for (uj, &wj) in st.u.iter_mut().zip(&w) {
                *uj = wj + eb * *uj;
            }
            sys.apply_op(&st.u, &mut st.au);

            // z = ζ M⁻¹r + η z − α u,  y = ζ A M⁻¹r + η y − α A u
            for (((zj, &rj), &uj), ((yj, &vj), &auj)) in st
                .z
                .iter_mut()
                .zip(&st.r_pc)
                .zip(&st.u)
                .zip(st.y.iter_mut().zip(&st.v).zip(&st.au))
            {
                *zj = zeta * rj + eta * *zj - alpha * uj;
                *yj = zeta * vj + eta * *yj - alpha * auj;
            }

            for ((xj, &pj), &zj) in x.iter_mut().zip(&st.p).zip(&st.z) {
                *xj = *xj + alpha * pj + zj;
            }
            for (((rn, &rj), &apj), &yj) in r_new.iter_mut().zip(&st.r).zip(&st.ap).zip(&st.y) {
                *rn = rj - alpha * apj - yj;
            }

            let res = ip.norm(&r_new);
            stats.final_residual = res;
            if !ip.all_true(res.is_finite() && all_finite(x)) {
                stats.outcome = Outcome::Breakdown(BreakdownInfo {
                    method: "bicgsafe",
                    iteration: i,
                    reason: "non-finite residual",
                });
                tracing::warn!(iteration = i, "BiCGSafe residual is not finite");
                return Ok(stats);
            }
            if ip.all_true(self.conv.reached(res, res0)) {
                sys.residual(x, &mut st.r);
                let true_res = ip.norm(&st.r);
                stats.final_residual = true_res;
                if ip.all_true(self.conv.reached(true_res, res0)) {
                    stats.outcome = Outcome::Converged;
                    tracing::debug!(iterations = i, "BiCGSafe converged");
                    return Ok(stats);
                }
                tracing::debug!(iteration = i, "recurred residual drifted, restarting");
                match self.start(sys, &mut st, res0)? {
                    Ok((a, zt)) => {
                        alpha = a;
                        zeta = zt;
                        eta = T::zero();
                        beta = T::zero();
                        continue;
                    }
                    Err(reason) => {
                        breakdown(&mut stats, x, i, reason);
                        return Ok(stats);
                    }
                }
            }

            let rho = ip.dot(&st.r_shadow, &st.r);
            if ip.all_true(self.vanishes(rho, res0) || is_trivial(zeta)) {
                breakdown(&mut stats, x, i, "(r̂, r) vanished");
                return Ok(stats);
            }
            beta = (alpha / zeta) * ip.dot(&st.r_shadow, &r_new) / rho;
            std::mem::swap(&mut st.r, &mut r_new);

            sys.precondition(&st.r, &mut st.r_pc)?;
            for ((pj, &rj), &uj) in st.p.iter_mut().zip(&st.r_pc).zip(&st.u) {
                *pj = rj + beta * (*pj - uj);
            }
            sys.apply_op(&st.r_pc, &mut st.v);
            for ((apj, &vj), &auj) in st.ap.iter_mut().zip(&st.v).zip(&st.au) {
                *apj = vj + beta * (*apj - auj);
            }

            let den = ip.dot(&st.r_shadow, &st.ap);
            if ip.all_true(self.vanishes(den, res0)) {
                breakdown(&mut stats, x, i, "(r̂, A p) vanished");
                return Ok(stats);
            }
            alpha = ip.dot(&st.r_shadow, &st.r) / den;

            let yy = ip.dot(&st.y, &st.y);
            let vv = ip.dot(&st.v, &st.v);
            let yv = ip.dot(&st.y, &st.v);
            let yr = ip.dot(&st.y, &st.r);
            let vr = ip.dot(&st.v, &st.r);
            let det = yy * vv - yv * yv;
            if ip.all_true(is_trivial(det) || !det.is_finite()) {
                breakdown(&mut stats, x, i, "minimization system is singular");
                return Ok(stats);
            }
            zeta = (yy * vr - yr * yv) / det;
            eta = (vv * yr - yv * vr) / det;
            if ip.all_true(is_trivial(zeta)) {
                breakdown(&mut stats, x, i, "ζ vanished");
                return Ok(stats);
            }
        }
        stats.final_residual = sys.true_residual_norm(x);
        tracing::warn!(
            iterations = stats.iterations,
            residual = ?stats.final_residual,
            "BiCGSafe reached the iteration cap"
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
        "bicgsafe"
    }
}
