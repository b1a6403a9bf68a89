//! Collective communication between cooperating solver processes.
//!
//! [`Comm`] is the narrow set of collectives the distributed pipeline needs:
//! scalar and element-wise reductions, a barrier, and a pairwise exchange with
//! known neighbours. Every participant must issue the same collectives in the
//! same order.
//!
//! Implementations:
//! - [`SerialComm`]: a single participant; every collective is the identity.
//! - [`ThreadComm`]: one thread per rank inside the current process. Reductions
//!   combine contributions in rank order, so results are bit-identical on
//!   every rank, and divergent collectives abort the run.
//! - `MpiComm` (feature `mpi`): the MPI world communicator.

pub mod thread_comm;
pub use thread_comm::ThreadComm;

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

/// Collective operations over the participating ranks.
pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);
    /// Sum of `x` over every rank.
    fn all_reduce_sum(&self, x: f64) -> f64;
    /// Maximum of `x` over every rank.
    fn all_reduce_max(&self, x: f64) -> f64;
    /// Element-wise sum of `v` over every rank, written back into `v`.
    fn all_reduce_sum_vec(&self, v: &mut [f64]);
    /// Send each `(peer, buffer)` of `sends` and fill each `(peer, buffer)`
    /// of `recvs` with what that peer sent here. Buffer lengths must match
    /// on both sides.
    fn exchange(&self, sends: &[(usize, Vec<f64>)], recvs: &mut [(usize, Vec<f64>)]);

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Minimum of `x` over every rank.
    fn all_reduce_min(&self, x: f64) -> f64 {
        -self.all_reduce_max(-x)
    }

    /// True on every rank iff `flag` is true on every rank.
    fn all_true(&self, flag: bool) -> bool {
        self.all_reduce_max(if flag { 0.0 } else { 1.0 }) == 0.0
    }
}

/// The single-process communicator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}
    fn all_reduce_sum(&self, x: f64) -> f64 {
        x
    }
    fn all_reduce_max(&self, x: f64) -> f64 {
        x
    }
    fn all_reduce_sum_vec(&self, _v: &mut [f64]) {}
    fn exchange(&self, sends: &[(usize, Vec<f64>)], recvs: &mut [(usize, Vec<f64>)]) {
        for (peer, buf) in recvs.iter_mut() {
            if let Some((_, data)) = sends.iter().find(|(p, _)| p == peer) {
                buf.copy_from_slice(data);
            }
        }
    }
}
