//! Wall-clock time spent in each phase of a solve, measured on this rank.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseTimes {
    /// Equilibration of A, zero when scaling is off.
    pub scaling: Duration,
    /// Direct LU factorization; zero on iterative paths and off the root.
    pub factorization: Duration,
    /// ILU build, including a failed attempt before the unpreconditioned fallback.
    pub preconditioner: Duration,
    /// Krylov iterations, or the triangular solves and refinement of the direct path.
    pub iteration: Duration,
}

impl PhaseTimes {
    pub fn total(&self) -> Duration {
        self.scaling + self.factorization + self.preconditioner + self.iteration
    }
}

/// Run `f` and return its result with the time it took.
pub fn timed<R>(f: impl FnOnce() -> R) -> (R, Duration) {
    let start = Instant::now();
    let out = f();
    (out, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_adds_every_phase() {
        let t = PhaseTimes {
            scaling: Duration::from_millis(1),
            factorization: Duration::from_millis(2),
            preconditioner: Duration::from_millis(3),
            iteration: Duration::from_millis(4),
        };
        assert_eq!(t.total(), Duration::from_millis(10));
        assert_eq!(PhaseTimes::default().total(), Duration::ZERO);
    }

    #[test]
    fn timed_passes_the_result_through() {
        let (v, d) = timed(|| (0..1000u64).sum::<u64>());
        assert_eq!(v, 499_500);
        assert!(d < Duration::from_secs(5));
    }
}
