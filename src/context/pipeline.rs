//! The single-process solve pipeline.
//!
//! Order: equilibrate (optional), factor ILU against the current matrix
//! (optional), run the Krylov method, then undo the scaling on x, b and A.
//! The same function runs on every rank of a decomposed solve, with the
//! rank's [`Coherence`](crate::domain::Coherence) as `ip`; every branch it
//! takes is decided from globally reduced values.

use crate::config::{KrylovKind, SolverConfig};
use crate::context::ksp_context::Ksp;
use crate::core::traits::{InnerProduct, Scalar};
use crate::error::KError;
use crate::matrix::CsrMatrix;
use crate::preconditioner::{Ilu, Preconditioner};
use crate::scaling::{normalize, scale, unscale, ScalingDiagnostics};
use crate::utils::convergence::{cast, Outcome, SolveStats};
use crate::utils::timing::{timed, PhaseTimes};
use bitflags::bitflags;

bitflags! {
    /// Pipeline stages that actually ran.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Stages: u32 {
        const SCALED                    = 0b0000_0001;
        const PRECONDITIONED            = 0b0000_0010;
        const UNPRECONDITIONED_FALLBACK = 0b0000_0100;
        const BREAKDOWN_FALLBACK        = 0b0000_1000;
        const DIRECT                    = 0b0001_0000;
        const DISTRIBUTED               = 0b0010_0000;
    }
}

/// What the iterative pipeline produced on this process.
#[derive(Clone, Debug)]
pub struct LocalOutcome<T> {
    /// Method that produced the final iterate.
    pub kind: KrylovKind,
    pub stats: SolveStats<T>,
    pub scaling: Option<ScalingDiagnostics<T>>,
    pub stages: Stages,
    pub times: PhaseTimes,
}

/// Run the iterative pipeline on `a x = b`.
///
/// `a` and `b` are transformed in place while scaling is active and are
/// restored before this returns, on success and on error alike. Outcomes
/// other than convergence are reported in the returned stats; only
/// configuration, dimension and (without fallback) singular-pivot failures
/// are errors.
pub fn solve_local<T: Scalar>(
    config: &SolverConfig,
    kind: KrylovKind,
    a: &mut CsrMatrix<T>,
    x: &mut [T],
    b: &mut [T],
    ip: &dyn InnerProduct<T>,
) -> Result<LocalOutcome<T>, KError> {
    if a.ncols() != x.len() {
        return Err(KError::DimensionMismatch { expected: a.ncols(), found: x.len() });
    }
    if a.nrows() != b.len() {
        return Err(KError::DimensionMismatch { expected: a.nrows(), found: b.len() });
    }
    let cap = config.max_iterations(ip.global_dim(a.nrows()));
    let mut stages = Stages::empty();
    let mut times = PhaseTimes::default();

    if !config.scaled {
        let (kind, stats) = iterate(config, kind, a, x, b, ip, cap, &mut stages, &mut times)?;
        return Ok(LocalOutcome { kind, stats, scaling: None, stages, times });
    }

    let (guard, scaling) = timed(|| normalize(a, cast(config.scaling_threshold), ip));
    times.scaling = scaling;
    let state = guard.state();
    scale(b, &state.row);
    unscale(x, &state.col);
    let result = iterate(config, kind, guard.matrix(), x, b, ip, cap, &mut stages, &mut times);
    scale(x, &state.col);
    unscale(b, &state.row);
    let diagnostics = guard.unnormalize();
    stages |= Stages::SCALED;

    let (kind, stats) = result?;
    Ok(LocalOutcome { kind, stats, scaling: Some(diagnostics), stages, times })
}

#[allow(clippy::too_many_arguments)]
fn iterate<T: Scalar>(
    config: &SolverConfig,
    kind: KrylovKind,
    a: &CsrMatrix<T>,
    x: &mut [T],
    b: &[T],
    ip: &dyn InnerProduct<T>,
    cap: usize,
    stages: &mut Stages,
    times: &mut PhaseTimes,
) -> Result<(KrylovKind, SolveStats<T>), KError> {
    let ilu = if config.preconditioned {
        let (ilu, elapsed) = timed(|| factor_agreed(config, a, ip, stages));
        times.preconditioner = elapsed;
        ilu?
    } else {
        None
    };
    let pc = ilu.as_ref().map(|p| p as &dyn Preconditioner<T>);

    let (stats, elapsed) = timed(|| run_krylov(config, kind, a, x, b, pc, ip, cap));
    times.iteration = elapsed;
    let stats = stats?;
    let next = match (stats.outcome, config.breakdown_fallback) {
        (Outcome::Breakdown(info), Some(next)) if next != kind => {
            tracing::info!(
                from = %kind,
                to = %next,
                reason = info.reason,
                "breakdown, switching method"
            );
            next
        }
        _ => return Ok((kind, stats)),
    };

    let (retry, elapsed) = timed(|| run_krylov(config, next, a, x, b, pc, ip, cap));
    times.iteration += elapsed;
    let retry = retry?;
    *stages |= Stages::BREAKDOWN_FALLBACK;
    Ok((
        next,
        SolveStats {
            iterations: stats.iterations + retry.iterations,
            initial_residual: stats.initial_residual,
            final_residual: retry.final_residual,
            outcome: retry.outcome,
        },
    ))
}

/// Factor ILU(k, τ) with every rank agreeing on the result. Returns `None`
/// when the factorization failed and the unpreconditioned fallback is on.
fn factor_agreed<T: Scalar>(
    config: &SolverConfig,
    a: &CsrMatrix<T>,
    ip: &dyn InnerProduct<T>,
    stages: &mut Stages,
) -> Result<Option<Ilu<T>>, KError> {
    let result = Ilu::factorize(a, config.fill_level, cast(config.fill_threshold));
    let failed_row = match &result {
        Err(KError::SingularPivot { row }) => Some(*row),
        _ => None,
    };
    let local_ok = match &result {
        Ok(_) => true,
        Err(KError::SingularPivot { .. }) => false,
        Err(_) => true,
    };
    if ip.all_true(local_ok) {
        return result.map(|ilu| {
            *stages |= Stages::PRECONDITIONED;
            Some(ilu)
        });
    }

    // smallest failing row over the ranks that failed
    let key = failed_row.map_or(T::neg_infinity(), |r| cast(-(r as f64)));
    let row = (-ip.global_max(key)).to_usize().unwrap_or(0);
    if config.fallback_unpreconditioned {
        tracing::info!(row, "singular pivot in ILU, continuing without preconditioner");
        *stages |= Stages::UNPRECONDITIONED_FALLBACK;
        Ok(None)
    } else {
        Err(KError::SingularPivot { row })
    }
}

#[allow(clippy::too_many_arguments)]
fn run_krylov<T: Scalar>(
    config: &SolverConfig,
    kind: KrylovKind,
    a: &CsrMatrix<T>,
    x: &mut [T],
    b: &[T],
    pc: Option<&dyn Preconditioner<T>>,
    ip: &dyn InnerProduct<T>,
    cap: usize,
) -> Result<SolveStats<T>, KError> {
    let mut ksp = Ksp::new(kind, a, b)
        .with_preconditioner(pc)
        .with_coherence(ip)
        .with_restart(config.restart)
        .with_breakdown_threshold(cast(config.breakdown_threshold));
    ksp.iteration_cap(cap);
    ksp.relative_residual_threshold(cast(config.convergence_threshold));
    ksp.solve(x)
}
