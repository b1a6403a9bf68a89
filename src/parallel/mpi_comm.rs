//! MPI-backed communicator (feature `mpi`).
//!
//! `MpiComm` wraps the world communicator and implements [`Comm`] with MPI
//! collectives. Halo exchange posts non-blocking sends to every peer before
//! receiving, so the order in which neighbours are listed cannot deadlock.
//!
//! # References
//! - [MPI Standard](https://www.mpi-forum.org/)

use super::Comm;
use crate::error::KError;
use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

/// MPI world communicator. MPI is finalized when this value is dropped.
pub struct MpiComm {
    /// The MPI world communicator (all processes in the job).
    pub world: SimpleCommunicator,
    pub rank: usize,
    pub size: usize,
    _universe: Universe,
}

impl MpiComm {
    /// Initialize MPI and wrap the world communicator.
    pub fn new() -> Result<Self, KError> {
        let universe = mpi::initialize()
            .ok_or_else(|| KError::Configuration("MPI is already initialized".into()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(MpiComm { world, rank, size, _universe: universe })
    }
}

impl Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.world.barrier();
    }

    fn all_reduce_sum(&self, x: f64) -> f64 {
        let mut y = 0.0;
        self.world.all_reduce_into(&x, &mut y, &SystemOperation::sum());
        y
    }

    fn all_reduce_max(&self, x: f64) -> f64 {
        let mut y = 0.0;
        self.world.all_reduce_into(&x, &mut y, &SystemOperation::max());
        y
    }

    fn all_reduce_sum_vec(&self, v: &mut [f64]) {
        let local = v.to_vec();
        self.world.all_reduce_into(&local[..], v, &SystemOperation::sum());
    }

    fn exchange(&self, sends: &[(usize, Vec<f64>)], recvs: &mut [(usize, Vec<f64>)]) {
        mpi::request::scope(|scope| {
            let pending: Vec<_> = sends
                .iter()
                .map(|(peer, buf)| {
                    self.world.process_at_rank(*peer as i32).immediate_send(scope, &buf[..])
                })
                .collect();
            for (peer, buf) in recvs.iter_mut() {
                self.world.process_at_rank(*peer as i32).receive_into(&mut buf[..]);
            }
            for request in pending {
                request.wait();
            }
        });
    }
}
