//! Distributed reductions for the Krylov iteration.

use crate::core::traits::{InnerProduct, Scalar};
use crate::core::wrappers::local_dot;
use crate::domain::subdomain::Subdomain;
use crate::parallel::Comm;
use crate::utils::convergence::cast;

/// [`InnerProduct`] over a [`Subdomain`].
///
/// Dot products run over the owned prefix of local vectors and are summed
/// across ranks, so every shared dof is counted once, on its owner. `sync`
/// refreshes halo entries from their owners. Reductions travel as `f64`.
pub struct Coherence<'c, C: Comm + ?Sized> {
    comm: &'c C,
    sub: &'c Subdomain,
}

impl<'c, C: Comm + ?Sized> Coherence<'c, C> {
    pub fn new(comm: &'c C, sub: &'c Subdomain) -> Self {
        Self { comm, sub }
    }

    pub fn subdomain(&self) -> &Subdomain {
        self.sub
    }
}

impl<T: Scalar, C: Comm + ?Sized> InnerProduct<T> for Coherence<'_, C> {
    fn dot(&self, x: &[T], y: &[T]) -> T {
        let owned = self.sub.n_owned();
        let local = local_dot(&x[..owned], &y[..owned]);
        cast(self.comm.all_reduce_sum(local.to_f64().unwrap_or(f64::NAN)))
    }

    fn sync(&self, v: &mut [T]) {
        let sends: Vec<(usize, Vec<f64>)> = self
            .sub
            .sends()
            .iter()
            .map(|(peer, idx)| {
                (*peer, idx.iter().map(|&l| v[l].to_f64().unwrap_or(f64::NAN)).collect())
            })
            .collect();
        let mut recvs: Vec<(usize, Vec<f64>)> =
            self.sub.recvs().iter().map(|(peer, idx)| (*peer, vec![0.0; idx.len()])).collect();
        self.comm.exchange(&sends, &mut recvs);
        for ((_, idx), (_, vals)) in self.sub.recvs().iter().zip(&recvs) {
            for (&l, &val) in idx.iter().zip(vals) {
                v[l] = cast(val);
            }
        }
    }

    fn all_true(&self, flag: bool) -> bool {
        self.comm.all_true(flag)
    }

    fn global_max(&self, value: T) -> T {
        cast(self.comm.all_reduce_max(value.to_f64().unwrap_or(f64::NAN)))
    }

    fn global_dim(&self, _local_len: usize) -> usize {
        self.sub.global_dim()
    }
}
