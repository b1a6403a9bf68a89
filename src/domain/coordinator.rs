//! Per-rank driver of the decomposed solve.
//!
//! A [`DomainCoordinator`] runs the four phases of a distributed solve on
//! one rank:
//!
//! 1. partition the global dependency graph (at construction);
//! 2. localize the global operator and vectors onto owned + halo dofs;
//! 3. hand the local problem and a [`Coherence`] to the caller's solve;
//! 4. globalize the local solution through a [`SyncHandle`].
//!
//! Every rank must construct its coordinator from the same global matrix and
//! partitioner; construction checks that the ranks agree on the problem
//! size before anything else is communicated.

use crate::core::traits::Scalar;
use crate::domain::coherence::Coherence;
use crate::domain::partition::{Partition, Partitioner};
use crate::domain::subdomain::Subdomain;
use crate::domain::sync::SyncHandle;
use crate::error::KError;
use crate::matrix::CsrMatrix;
use crate::parallel::Comm;

pub struct DomainCoordinator<'c, C: Comm + ?Sized> {
    comm: &'c C,
    partition: Partition,
    sub: Subdomain,
}

impl<'c, C: Comm + ?Sized> DomainCoordinator<'c, C> {
    /// Partition `a` over the ranks of `comm` and build this rank's subdomain.
    pub fn new<T: Scalar>(
        comm: &'c C,
        a: &CsrMatrix<T>,
        partitioner: &dyn Partitioner,
    ) -> Result<Self, KError> {
        let n = a.nrows();
        let (lo, hi) = (comm.all_reduce_min(n as f64), comm.all_reduce_max(n as f64));
        if lo != hi {
            return Err(KError::CollectiveMismatch(format!(
                "ranks disagree on the global dimension (rank {} has {n}, range {lo}..={hi})",
                comm.rank()
            )));
        }
        if a.ncols() != n {
            return Err(KError::DimensionMismatch { expected: n, found: a.ncols() });
        }
        let adjacency = a.pattern_adjacency();
        let partition = partitioner.partition(&adjacency, comm.size())?;
        let sub = Subdomain::new(&partition, &adjacency, comm.rank());
        tracing::debug!(
            rank = comm.rank(),
            owned = sub.n_owned(),
            halo = sub.n_halo(),
            "subdomain ready"
        );
        Ok(Self { comm, partition, sub })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn subdomain(&self) -> &Subdomain {
        &self.sub
    }

    pub fn comm(&self) -> &C {
        self.comm
    }

    pub fn coherence(&self) -> Coherence<'_, C> {
        Coherence::new(self.comm, &self.sub)
    }

    pub fn sync_handle(&self) -> SyncHandle<'_, C> {
        SyncHandle::new(self.comm, &self.sub)
    }

    /// Local operator, initial guess and right-hand side of this rank.
    pub fn localize<T: Scalar>(
        &self,
        a: &CsrMatrix<T>,
        x: &[T],
        b: &[T],
    ) -> (CsrMatrix<T>, Vec<T>, Vec<T>) {
        (self.sub.restrict_matrix(a), self.sub.restrict_vector(x), self.sub.restrict_vector(b))
    }

    /// Reconcile the local solution into `global` on every rank.
    pub fn globalize<T: Scalar>(&self, local: &[T], global: &mut [T]) {
        self.sync_handle().globalize(local, global);
    }

    /// Run all four phases. `local_solve` sees the local operator, solution
    /// and right-hand side plus the coherence handle; its result is returned
    /// once `x` holds the reconciled global solution.
    ///
    /// `x` is globalized even when a rank's local solve fails, so the
    /// collective sequence stays the same on every rank. If any rank fails,
    /// every rank returns an error of the same kind: its own when it failed
    /// that way, otherwise one rebuilt from the reduced kind and detail.
    pub fn solve<T, R, F>(
        &self,
        a: &CsrMatrix<T>,
        x: &mut [T],
        b: &[T],
        local_solve: F,
    ) -> Result<R, KError>
    where
        T: Scalar,
        F: FnOnce(&mut CsrMatrix<T>, &mut [T], &mut [T], &Coherence<'_, C>) -> Result<R, KError>,
    {
        let _span = tracing::debug_span!(
            "domain_solve",
            rank = self.comm.rank(),
            owned = self.sub.n_owned(),
            halo = self.sub.n_halo()
        )
        .entered();
        let (mut la, mut lx, mut lb) = self.localize(a, x, b);
        let coherence = self.coherence();
        let outcome = local_solve(&mut la, &mut lx, &mut lb, &coherence);
        let local_code = outcome.as_ref().err().map_or(0, error_code);
        let code = self.comm.all_reduce_max(local_code as f64) as u8;
        self.globalize(&lx, x);
        if code == 0 {
            return outcome;
        }
        // every rank returns the most severe kind seen, with its smallest detail
        let detail = match &outcome {
            Err(e) if error_code(e) == code => error_detail(e) as f64,
            _ => f64::INFINITY,
        };
        let detail = self.comm.all_reduce_min(detail) as usize;
        match outcome {
            Err(e) if error_code(&e) == code => Err(e),
            _ => Err(remote_error(code, detail)),
        }
    }
}

fn error_code(e: &KError) -> u8 {
    match e {
        KError::Configuration(_) => 1,
        KError::Parse { .. } => 2,
        KError::DimensionMismatch { .. } => 3,
        KError::EntryOutOfBounds { .. } => 4,
        KError::SingularPivot { .. } => 5,
        KError::FactorizationFailed(_) => 6,
        KError::Breakdown { .. } => 7,
        KError::NonConvergence { .. } => 8,
        KError::Io(_) => 9,
        KError::CollectiveMismatch(_) => 10,
    }
}

fn error_detail(e: &KError) -> usize {
    match e {
        KError::Parse { line, .. } => *line,
        KError::DimensionMismatch { expected, .. } => *expected,
        KError::EntryOutOfBounds { row, .. } | KError::SingularPivot { row } => *row,
        KError::Breakdown { iteration, .. } => *iteration,
        KError::NonConvergence { iterations, .. } => *iterations,
        _ => 0,
    }
}

/// The error a rank reports when another rank failed with kind `code`.
fn remote_error(code: u8, detail: usize) -> KError {
    const REMOTE: &str = "failed on another rank";
    match code {
        1 => KError::Configuration(REMOTE.into()),
        2 => KError::Parse { line: detail, msg: REMOTE.into() },
        3 => KError::DimensionMismatch { expected: detail, found: detail },
        4 => KError::EntryOutOfBounds { row: detail, col: 0, nrows: 0, ncols: 0 },
        5 => KError::SingularPivot { row: detail },
        6 => KError::FactorizationFailed(REMOTE.into()),
        7 => KError::Breakdown { method: "remote", iteration: detail, reason: REMOTE },
        8 => KError::NonConvergence { iterations: detail, relative_residual: f64::NAN },
        9 => KError::Io(std::io::Error::other(REMOTE)),
        _ => KError::CollectiveMismatch(REMOTE.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::InnerProduct;
    use crate::domain::partition::BlockPartitioner;
    use crate::parallel::ThreadComm;

    fn chain(n: usize) -> CsrMatrix<f64> {
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 3.0));
            if i > 0 {
                t.push((i, i - 1, -1.0));
            }
            if i + 1 < n {
                t.push((i, i + 1, -1.0));
            }
        }
        CsrMatrix::from_triplets(n, n, &t).unwrap()
    }

    #[test]
    fn coherent_dot_counts_shared_dofs_once() {
        let a = chain(10);
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let serial = InnerProduct::<f64>::dot(&(), &x, &x);
        let out = ThreadComm::run(3, |c| {
            let dc = DomainCoordinator::new(c, &a, &BlockPartitioner).unwrap();
            let lx = dc.subdomain().restrict_vector(&x);
            InnerProduct::<f64>::dot(&dc.coherence(), &lx, &lx)
        });
        for d in out {
            assert_eq!(d, serial);
        }
    }

    #[test]
    fn sync_refreshes_halo_from_owners() {
        let a = chain(8);
        let out = ThreadComm::run(2, |c| {
            let dc = DomainCoordinator::new(c, &a, &BlockPartitioner).unwrap();
            let sub = dc.subdomain();
            // owned entries carry the global index, halo entries garbage
            let mut v: Vec<f64> = sub.dofs().iter().map(|&g| g as f64).collect();
            for e in &mut v[sub.n_owned()..] {
                *e = -7.0;
            }
            InnerProduct::<f64>::sync(&dc.coherence(), &mut v);
            v.iter().zip(sub.dofs()).all(|(&e, &g)| e == g as f64)
        });
        assert_eq!(out, vec![true, true]);
    }

    #[test]
    fn globalize_is_identical_on_every_rank() {
        let a = chain(11);
        let x: Vec<f64> = (0..11).map(|i| (i as f64).sqrt()).collect();
        let out = ThreadComm::run(4, |c| {
            let dc = DomainCoordinator::new(c, &a, &BlockPartitioner).unwrap();
            let lx = dc.subdomain().restrict_vector(&x);
            let mut global = vec![f64::NAN; 11];
            dc.globalize(&lx, &mut global);
            global
        });
        for g in &out {
            assert_eq!(g, &x);
        }
    }

    #[test]
    fn differing_dimensions_are_rejected() {
        let small = chain(6);
        let large = chain(7);
        let out = ThreadComm::run(2, |c| {
            let a = if c.rank() == 0 { &small } else { &large };
            matches!(
                DomainCoordinator::new(c, a, &BlockPartitioner),
                Err(KError::CollectiveMismatch(_))
            )
        });
        assert_eq!(out, vec![true, true]);
    }

    #[test]
    fn remote_failure_keeps_its_kind() {
        let a = chain(9);
        let out = ThreadComm::run(3, |c| {
            let dc = DomainCoordinator::new(c, &a, &BlockPartitioner).unwrap();
            let mut x = vec![0.0; 9];
            dc.solve(&a, &mut x, &vec![1.0; 9], |_, lx, _, _| {
                lx.fill(1.0);
                if c.rank() == 2 {
                    return Err(KError::SingularPivot { row: 4 });
                }
                Ok(())
            })
            .map(|_| x)
        });
        for r in out {
            assert!(matches!(r, Err(KError::SingularPivot { row: 4 })), "{r:?}");
        }
    }

    #[test]
    fn most_severe_failure_wins_on_every_rank() {
        let a = chain(6);
        let out = ThreadComm::run(2, |c| {
            let dc = DomainCoordinator::new(c, &a, &BlockPartitioner).unwrap();
            let mut x = vec![0.0; 6];
            let res: Result<(), KError> = dc.solve(&a, &mut x, &vec![1.0; 6], |_, _, _, _| {
                if c.rank() == 0 {
                    Err(KError::Configuration("bad".into()))
                } else {
                    Err(KError::FactorizationFailed("lu".into()))
                }
            });
            res
        });
        let remote = "failed on another rank";
        assert!(matches!(&out[0], Err(KError::FactorizationFailed(m)) if m == remote));
        assert!(matches!(&out[1], Err(KError::FactorizationFailed(m)) if m == "lu"));
    }
}
