//! Domain decomposition.
//!
//! Splits a global operator over the ranks of a [`crate::parallel::Comm`],
//! runs the single-process pipeline on each rank's owned + halo subproblem,
//! and reconciles the local solutions into one global vector that is
//! bit-identical on every rank.

pub mod coherence;
pub mod coordinator;
pub mod partition;
pub mod subdomain;
pub mod sync;

pub use coherence::Coherence;
pub use coordinator::DomainCoordinator;
pub use partition::{BfsPartitioner, BlockPartitioner, Partition, Partitioner};
pub use subdomain::Subdomain;
pub use sync::SyncHandle;
