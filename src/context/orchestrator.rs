//! Top-level driver: one call per run, on every rank.
//!
//! [`Orchestrator::run`] validates the configuration, dispatches to the
//! direct adapter, the decomposed iterative solve or the local pipeline,
//! computes the residual of the reconciled global solution and lets rank 0
//! report it.

use crate::config::{Method, SolverConfig};
use crate::context::pipeline::{solve_local, Stages};
use crate::core::vector::norm2;
use crate::domain::{BlockPartitioner, DomainCoordinator, Partitioner};
use crate::error::KError;
use crate::matrix::CsrMatrix;
use crate::parallel::Comm;
use crate::scaling::ScalingDiagnostics;
use crate::solver::direct_lu::solve_on_root;
use crate::utils::convergence::{Outcome, SolveStats};
use crate::utils::timing::PhaseTimes;

/// ‖Ax − b‖ of the returned x, absolute and divided by ‖x‖.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResidualReport {
    pub absolute: f64,
    /// Equal to `absolute` when x is zero.
    pub relative_to_x: f64,
}

/// Everything a run produced besides x itself.
#[derive(Clone, Debug)]
pub struct SolveReport {
    /// Method that produced x; differs from the configured one after a
    /// breakdown fallback.
    pub method: Method,
    pub stats: SolveStats<f64>,
    pub scaling: Option<ScalingDiagnostics<f64>>,
    pub residual: ResidualReport,
    pub stages: Stages,
    /// Phase times measured on this rank.
    pub times: PhaseTimes,
}

impl SolveReport {
    pub fn converged(&self) -> bool {
        self.stats.converged()
    }

    /// Map a non-converged run onto [`KError::NonConvergence`] or
    /// [`KError::Breakdown`].
    pub fn check(self) -> Result<Self, KError> {
        self.stats.clone().check()?;
        Ok(self)
    }
}

/// Runs configured solves over a communicator.
pub struct Orchestrator<'c, C: Comm + ?Sized> {
    config: SolverConfig,
    comm: &'c C,
    partitioner: Box<dyn Partitioner>,
}

impl<'c, C: Comm + ?Sized> Orchestrator<'c, C> {
    pub fn new(config: SolverConfig, comm: &'c C) -> Self {
        Self { config, comm, partitioner: Box::new(BlockPartitioner) }
    }

    pub fn with_partitioner(mut self, partitioner: Box<dyn Partitioner>) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve `a x = b` starting from `x`.
    ///
    /// Every rank passes the same global system and receives the same x.
    /// `a` and `b` are restored before this returns. Non-convergence and
    /// breakdown are reported in the returned [`SolveReport`], not as errors.
    pub fn run(
        &self,
        a: &mut CsrMatrix<f64>,
        x: &mut [f64],
        b: &mut [f64],
    ) -> Result<SolveReport, KError> {
        self.config.validate()?;
        let n = a.nrows();
        if a.ncols() != n {
            return Err(KError::DimensionMismatch { expected: n, found: a.ncols() });
        }
        if x.len() != n {
            return Err(KError::DimensionMismatch { expected: n, found: x.len() });
        }
        if b.len() != n {
            return Err(KError::DimensionMismatch { expected: n, found: b.len() });
        }
        let distributed = self.comm.size() > 1;
        let _span = tracing::debug_span!(
            "orchestrate",
            method = %self.config.method,
            n,
            ranks = self.comm.size()
        )
            .entered();

        let (method, mut stats, scaling, mut stages, times) = match self.config.method.krylov() {
            None => {
                let initial_residual = norm2(b);
                let times = solve_on_root(a, b, x, self.config.lu, self.comm)?;
                let stats = SolveStats {
                    iterations: 1,
                    initial_residual,
                    final_residual: 0.0,
                    outcome: Outcome::Converged,
                };
                (Method::Direct, stats, None, Stages::DIRECT, times)
            }
            Some(kind) if distributed => {
                let dc = DomainCoordinator::new(self.comm, a, self.partitioner.as_ref())?;
                let out = dc.solve(a, x, b, |la, lx, lb, coherence| {
                    solve_local(&self.config, kind, la, lx, lb, coherence)
                })?;
                (Method::from(out.kind), out.stats, out.scaling, out.stages, out.times)
            }
            Some(kind) => {
                let out = solve_local(&self.config, kind, a, x, b, &())?;
                (Method::from(out.kind), out.stats, out.scaling, out.stages, out.times)
            }
        };
        if distributed {
            stages |= Stages::DISTRIBUTED;
        }

        let residual = global_residual(a, x, b);
        if method == Method::Direct {
            stats.final_residual = residual.absolute;
        }
        let report = SolveReport { method, stats, scaling, residual, stages, times };
        if self.comm.is_root() {
            emit(&report);
        }
        Ok(report)
    }
}

fn global_residual(a: &CsrMatrix<f64>, x: &[f64], b: &[f64]) -> ResidualReport {
    let mut r = vec![0.0; b.len()];
    a.residual(x, b, &mut r);
    let absolute = norm2(&r);
    let xnorm = norm2(x);
    let relative_to_x = if xnorm > 0.0 { absolute / xnorm } else { absolute };
    ResidualReport { absolute, relative_to_x }
}

fn emit(report: &SolveReport) {
    let t = &report.times;
    tracing::info!(
        scaling_s = t.scaling.as_secs_f64(),
        factorization_s = t.factorization.as_secs_f64(),
        preconditioner_s = t.preconditioner.as_secs_f64(),
        iteration_s = t.iteration.as_secs_f64(),
        "phase times"
    );
    if let Some(s) = &report.scaling {
        tracing::info!(
            ratio = s.ratio,
            rnorm = s.row_norm,
            cnorm = s.col_norm,
            sweeps = s.sweeps,
            "scaling quality"
        );
    }
    tracing::info!(
        method = %report.method,
        iterations = report.stats.iterations,
        outcome = ?report.stats.outcome,
        residual = report.residual.absolute,
        relative = report.residual.relative_to_x,
        "solve finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KrylovKind;
    use crate::parallel::{SerialComm, ThreadComm};
    use crate::solver::test_support::convection_diffusion;
    use approx::assert_abs_diff_eq;

    fn rhs(a: &CsrMatrix<f64>) -> (Vec<f64>, Vec<f64>) {
        let x_true: Vec<f64> = (0..a.nrows()).map(|i| ((i * 7) % 5) as f64 - 2.0).collect();
        let mut b = vec![0.0; a.nrows()];
        a.spmv(&x_true, &mut b);
        (x_true, b)
    }

    #[test]
    fn direct_reports_true_residual() {
        let mut a = convection_diffusion(4);
        let (x_true, mut b) = rhs(&a);
        let mut x = vec![0.0; 16];
        let report = Orchestrator::new(SolverConfig::default(), &SerialComm)
            .run(&mut a, &mut x, &mut b)
            .unwrap();
        assert_eq!(report.method, Method::Direct);
        assert!(report.stages.contains(Stages::DIRECT));
        assert!(report.residual.absolute < 1e-10);
        assert_eq!(report.stats.final_residual, report.residual.absolute);
        for (xi, ti) in x.iter().zip(&x_true) {
            assert_abs_diff_eq!(xi, ti, epsilon = 1e-10);
        }
    }

    #[test]
    fn invalid_configuration_fails_before_solving() {
        let mut a = convection_diffusion(3);
        let (_, mut b) = rhs(&a);
        let mut x = vec![0.0; 9];
        let cfg = SolverConfig::new(Method::Gmres).with_convergence_threshold(-1.0);
        let err = Orchestrator::new(cfg, &SerialComm).run(&mut a, &mut x, &mut b).unwrap_err();
        assert!(matches!(err, KError::Configuration(_)));
        assert!(x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn non_convergence_is_a_report_not_an_error() {
        let mut a = convection_diffusion(6);
        let (_, mut b) = rhs(&a);
        let mut x = vec![0.0; 36];
        let cfg = SolverConfig::new(Method::BiCgStab).with_max_iterations(1);
        let report = Orchestrator::new(cfg, &SerialComm).run(&mut a, &mut x, &mut b).unwrap();
        assert_eq!(report.stats.outcome, Outcome::MaxIterReached);
        assert_abs_diff_eq!(report.residual.absolute, report.stats.final_residual, epsilon = 1e-12);
        assert!(matches!(report.check(), Err(KError::NonConvergence { iterations: 1, .. })));
    }

    #[test]
    fn two_ranks_agree_with_one() {
        let a = convection_diffusion(5);
        let (x_true, b) = rhs(&a);
        let cfg = SolverConfig::new(Method::Gmres)
            .with_scaling(true)
            .with_preconditioning(true)
            .with_convergence_threshold(1e-12)
            .with_max_iterations(40);
        let out = ThreadComm::run(2, |c| {
            let (mut a, mut b) = (a.clone(), b.clone());
            let mut x = vec![0.0; 25];
            let report = Orchestrator::new(cfg.clone(), c).run(&mut a, &mut x, &mut b).unwrap();
            assert!(report.stages.contains(Stages::DISTRIBUTED | Stages::SCALED));
            assert_eq!(report.method, Method::from(KrylovKind::Gmres));
            x
        });
        assert_eq!(out[0], out[1]);
        for (xi, ti) in out[0].iter().zip(&x_true) {
            assert_abs_diff_eq!(xi, ti, epsilon = 1e-8);
        }
    }

    fn assert_times_match_stages(report: &SolveReport) {
        let (t, st) = (&report.times, report.stages);
        assert!(!t.iteration.is_zero(), "{st:?}");
        assert_eq!(t.factorization.is_zero(), !st.contains(Stages::DIRECT), "{st:?}");
        assert_eq!(t.scaling.is_zero(), !st.contains(Stages::SCALED), "{st:?}");
        let attempted_ilu =
            st.intersects(Stages::PRECONDITIONED | Stages::UNPRECONDITIONED_FALLBACK);
        assert_eq!(t.preconditioner.is_zero(), !attempted_ilu, "{st:?}");
    }

    #[test]
    fn phase_times_follow_the_stages_that_ran() {
        let configs = [
            SolverConfig::default(),
            SolverConfig::new(Method::Gmres),
            SolverConfig::new(Method::BiCgStab).with_scaling(true),
            SolverConfig::new(Method::BiCgSafe).with_preconditioning(true),
            SolverConfig::new(Method::Gmres).with_scaling(true).with_preconditioning(true),
        ];
        for cfg in configs {
            let mut a = convection_diffusion(5);
            let (_, mut b) = rhs(&a);
            let mut x = vec![0.0; 25];
            let report = Orchestrator::new(cfg, &SerialComm).run(&mut a, &mut x, &mut b).unwrap();
            assert_times_match_stages(&report);
        }

        // zero pivot in row 0 sends ILU(0) to the unpreconditioned fallback
        let mut a =
            CsrMatrix::from_triplets(2, 2, &[(0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0)]).unwrap();
        let (mut b, mut x) = (vec![1.0, 2.0], vec![0.0; 2]);
        let cfg = SolverConfig::new(Method::Gmres)
            .with_preconditioning(true)
            .with_fill(0, 0.0)
            .with_unpreconditioned_fallback(true);
        let report = Orchestrator::new(cfg, &SerialComm).run(&mut a, &mut x, &mut b).unwrap();
        assert!(report.stages.contains(Stages::UNPRECONDITIONED_FALLBACK));
        assert_times_match_stages(&report);

        let a = convection_diffusion(5);
        let (_, b) = rhs(&a);
        let cfg = SolverConfig::new(Method::Gmres).with_scaling(true).with_preconditioning(true);
        ThreadComm::run(2, |c| {
            let (mut a, mut b) = (a.clone(), b.clone());
            let mut x = vec![0.0; 25];
            let report = Orchestrator::new(cfg.clone(), c).run(&mut a, &mut x, &mut b).unwrap();
            assert!(report.stages.contains(Stages::DISTRIBUTED));
            assert_times_match_stages(&report);
        });
    }
}
