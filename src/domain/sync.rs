//! Reconciliation of a distributed solution into one global vector.

use crate::core::traits::Scalar;
use crate::domain::subdomain::Subdomain;
use crate::parallel::Comm;
use crate::utils::convergence::cast;

/// Merges per-rank owned entries into a global vector that is identical on
/// every rank.
///
/// The global vector is cleared, each rank writes the entries it owns, and
/// an element-wise sum reduction combines the ranks. Every entry has exactly
/// one nonzero contributor, its owner, so the sum reproduces the owner's
/// value exactly and the result does not depend on the rank count.
pub struct SyncHandle<'c, C: Comm + ?Sized> {
    comm: &'c C,
    sub: &'c Subdomain,
}

impl<'c, C: Comm + ?Sized> SyncHandle<'c, C> {
    pub fn new(comm: &'c C, sub: &'c Subdomain) -> Self {
        Self { comm, sub }
    }

    pub fn globalize<T: Scalar>(&self, local: &[T], global: &mut [T]) {
        global.iter_mut().for_each(|v| *v = T::zero());
        self.sub.reflect_owned(local, global);
        let mut acc: Vec<f64> = global.iter().map(|v| v.to_f64().unwrap_or(f64::NAN)).collect();
        self.comm.all_reduce_sum_vec(&mut acc);
        for (gi, ai) in global.iter_mut().zip(&acc) {
            *gi = cast(*ai);
        }
    }
}
