//! One rank's view of a partitioned problem.
//!
//! Local numbering puts the owned dofs first, in owner-local order, and the
//! one-layer halo after them (neighbours of owned dofs owned elsewhere),
//! sorted by global index. The send and receive lists pair up across ranks:
//! what rank p sends to q and what q receives from p are the same dofs in
//! the same (global) order.

use crate::core::traits::Scalar;
use crate::domain::partition::Partition;
use crate::matrix::CsrMatrix;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Clone, Debug)]
pub struct Subdomain {
    rank: usize,
    global_dim: usize,
    /// Local → global.
    dofs: Vec<usize>,
    n_owned: usize,
    local_of: HashMap<usize, usize>,
    /// (peer, local indices of owned dofs held in the peer's halo)
    sends: Vec<(usize, Vec<usize>)>,
    /// (peer, local indices of halo dofs owned by the peer)
    recvs: Vec<(usize, Vec<usize>)>,
}

impl Subdomain {
    /// Build the subdomain of `rank`. `adjacency` must be symmetric.
    pub fn new(partition: &Partition, adjacency: &[Vec<usize>], rank: usize) -> Self {
        let owned = partition.owned_by(rank);
        let halo: BTreeSet<usize> = owned
            .iter()
            .flat_map(|&g| adjacency[g].iter().copied())
            .filter(|&h| partition.owner(h) != rank)
            .collect();

        let mut dofs = owned.to_vec();
        let n_owned = dofs.len();
        dofs.extend(halo.iter().copied());
        let local_of: HashMap<usize, usize> =
            dofs.iter().enumerate().map(|(l, &g)| (g, l)).collect();

        let mut recvs: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &h in &halo {
            recvs.entry(partition.owner(h)).or_default().push(local_of[&h]);
        }

        let mut sends: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (l, &g) in owned.iter().enumerate() {
            let peers: BTreeSet<usize> = adjacency[g]
                .iter()
                .map(|&h| partition.owner(h))
                .filter(|&p| p != rank)
                .collect();
            for p in peers {
                sends.entry(p).or_default().push(l);
            }
        }
        // owned order is increasing global order, so each send list is sorted
        // by global index like the matching receive list on the peer

        Self {
            rank,
            global_dim: partition.global_dim(),
            dofs,
            n_owned,
            local_of,
            sends: sends.into_iter().collect(),
            recvs: recvs.into_iter().collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn global_dim(&self) -> usize {
        self.global_dim
    }

    pub fn n_owned(&self) -> usize {
        self.n_owned
    }

    pub fn n_halo(&self) -> usize {
        self.dofs.len() - self.n_owned
    }

    pub fn n_local(&self) -> usize {
        self.dofs.len()
    }

    /// Global index of every local dof.
    pub fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    pub fn local_of(&self, g: usize) -> Option<usize> {
        self.local_of.get(&g).copied()
    }

    pub fn sends(&self) -> &[(usize, Vec<usize>)] {
        &self.sends
    }

    pub fn recvs(&self) -> &[(usize, Vec<usize>)] {
        &self.recvs
    }

    /// Local operator: owned rows complete, halo rows restricted to local
    /// columns.
    pub fn restrict_matrix<T: Scalar>(&self, a: &CsrMatrix<T>) -> CsrMatrix<T> {
        a.restrict(&self.dofs, self.dofs.len(), |g| self.local_of(g))
    }

    /// Local copy of a global vector.
    pub fn restrict_vector<T: Copy>(&self, global: &[T]) -> Vec<T> {
        self.dofs.iter().map(|&g| global[g]).collect()
    }

    /// Write the owned entries of `local` into `global`; other entries of
    /// `global` are left alone.
    pub fn reflect_owned<T: Copy>(&self, local: &[T], global: &mut [T]) {
        for (l, &g) in self.dofs[..self.n_owned].iter().enumerate() {
            global[g] = local[l];
        }
    }
}
