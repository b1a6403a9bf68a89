//! Assignment of global degrees of freedom to ranks.
//!
//! A [`Partition`] maps every global dof to its owning rank and its index
//! among that rank's owned dofs. Partitioners only see the symmetrized
//! adjacency graph of the operator, so every rank computes the same
//! partition from the same matrix without communicating.

use crate::error::KError;

/// Owner rank and owner-local index of every global dof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    owner: Vec<usize>,
    local_index: Vec<usize>,
    owned: Vec<Vec<usize>>,
}

impl Partition {
    /// Build from an owner per dof. Owned dofs are numbered on their rank in
    /// increasing global order.
    pub fn from_owners(owner: Vec<usize>, nranks: usize) -> Result<Self, KError> {
        if nranks == 0 {
            return Err(KError::Configuration("a partition needs at least one rank".into()));
        }
        let mut owned = vec![Vec::new(); nranks];
        let mut local_index = vec![0; owner.len()];
        for (g, &r) in owner.iter().enumerate() {
            if r >= nranks {
                return Err(KError::Configuration(format!(
                    "dof {g} assigned to rank {r} of {nranks}"
                )));
            }
            local_index[g] = owned[r].len();
            owned[r].push(g);
        }
        Ok(Self { owner, local_index, owned })
    }

    pub fn global_dim(&self) -> usize {
        self.owner.len()
    }

    pub fn nranks(&self) -> usize {
        self.owned.len()
    }

    pub fn owner(&self, g: usize) -> usize {
        self.owner[g]
    }

    pub fn local_index(&self, g: usize) -> usize {
        self.local_index[g]
    }

    /// Global indices owned by `rank`, in owner-local order.
    pub fn owned_by(&self, rank: usize) -> &[usize] {
        &self.owned[rank]
    }

    /// Dofs with at least one neighbour owned by another rank.
    pub fn boundary(&self, adjacency: &[Vec<usize>]) -> Vec<usize> {
        (0..self.global_dim())
            .filter(|&g| adjacency[g].iter().any(|&h| self.owner[h] != self.owner[g]))
            .collect()
    }
}

/// Strategy that splits a dependency graph over `nranks` ranks.
pub trait Partitioner {
    fn partition(&self, adjacency: &[Vec<usize>], nranks: usize) -> Result<Partition, KError>;
}

/// Contiguous blocks of n / nranks dofs; the last rank also takes the
/// remainder.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockPartitioner;

/// Owner of position `k` in a sequence of `n` split into contiguous blocks.
fn block_owner(k: usize, n: usize, nranks: usize) -> usize {
    let chunk = n / nranks;
    if chunk == 0 { nranks - 1 } else { (k / chunk).min(nranks - 1) }
}

impl Partitioner for BlockPartitioner {
    fn partition(&self, adjacency: &[Vec<usize>], nranks: usize) -> Result<Partition, KError> {
        if nranks == 0 {
            return Err(KError::Configuration("a partition needs at least one rank".into()));
        }
        let n = adjacency.len();
        Partition::from_owners((0..n).map(|g| block_owner(g, n, nranks)).collect(), nranks)
    }
}

/// Breadth-first ordering from a pseudo-peripheral vertex of each connected
/// component, cut into contiguous blocks. Keeps each rank's dofs close in
/// the graph when the natural numbering does not.
#[derive(Debug, Default, Clone, Copy)]
pub struct BfsPartitioner;

impl BfsPartitioner {
    /// Level structure rooted at `root`: visit order and the depth of each
    /// visited vertex, in the same order.
    fn bfs(adjacency: &[Vec<usize>], root: usize, seen: &mut [bool]) -> (Vec<usize>, Vec<usize>) {
        let mut order = vec![root];
        let mut depth = vec![0usize];
        seen[root] = true;
        let mut k = 0;
        while k < order.len() {
            let v = order[k];
            let mut nbrs: Vec<usize> = adjacency[v].iter().copied().filter(|&w| !seen[w]).collect();
            nbrs.sort_by_key(|&w| (adjacency[w].len(), w));
            for w in nbrs {
                seen[w] = true;
                order.push(w);
                depth.push(depth[k] + 1);
            }
            k += 1;
        }
        (order, depth)
    }

    /// George–Liu search: hop to a minimum-degree vertex of the deepest
    /// level until the eccentricity stops growing.
    fn pseudo_peripheral(adjacency: &[Vec<usize>], start: usize) -> usize {
        let n = adjacency.len();
        let mut root = start;
        let (mut order, mut depth) = Self::bfs(adjacency, root, &mut vec![false; n]);
        loop {
            let ecc = depth.last().copied().unwrap_or(0);
            let candidate = order
                .iter()
                .zip(&depth)
                .filter(|&(_, &d)| d == ecc)
                .map(|(&v, _)| v)
                .min_by_key(|&w| (adjacency[w].len(), w))
                .unwrap_or(root);
            let (next_order, next_depth) = Self::bfs(adjacency, candidate, &mut vec![false; n]);
            if next_depth.last().copied().unwrap_or(0) <= ecc {
                return root;
            }
            root = candidate;
            order = next_order;
            depth = next_depth;
        }
    }

    /// Full BFS ordering of the graph, component by component.
    pub fn ordering(adjacency: &[Vec<usize>]) -> Vec<usize> {
        let n = adjacency.len();
        let mut seen = vec![false; n];
        let mut ordering = Vec::with_capacity(n);
        for start in 0..n {
            if seen[start] {
                continue;
            }
            let root = Self::pseudo_peripheral(adjacency, start);
            let (order, _) = Self::bfs(adjacency, root, &mut seen);
            ordering.extend(order);
        }
        ordering
    }
}

impl Partitioner for BfsPartitioner {
    fn partition(&self, adjacency: &[Vec<usize>], nranks: usize) -> Result<Partition, KError> {
        if nranks == 0 {
            return Err(KError::Configuration("a partition needs at least one rank".into()));
        }
        let n = adjacency.len();
        let mut owner = vec![0; n];
        for (k, g) in Self::ordering(adjacency).into_iter().enumerate() {
            owner[g] = block_owner(k, n, nranks);
        }
        Partition::from_owners(owner, nranks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(n: usize) -> Vec<Vec<usize>> {
        (0..n)
            .map(|i| {
                let mut v = Vec::new();
                if i > 0 {
                    v.push(i - 1);
                }
                if i + 1 < n {
                    v.push(i + 1);
                }
                v
            })
            .collect()
    }

    #[test]
    fn block_remainder_goes_to_last_rank() {
        let p = BlockPartitioner.partition(&path(10), 3).unwrap();
        assert_eq!(p.owned_by(0), &[0, 1, 2]);
        assert_eq!(p.owned_by(1), &[3, 4, 5]);
        assert_eq!(p.owned_by(2), &[6, 7, 8, 9]);
        assert_eq!(p.owner(7), 2);
        assert_eq!(p.local_index(7), 1);
        assert_eq!(p.boundary(&path(10)), vec![2, 3, 5, 6]);
    }

    #[test]
    fn bfs_starts_at_a_path_end() {
        // relabelled path on which vertex 0 is interior
        let perm = [3, 2, 4, 1, 5, 0, 6];
        let base = path(7);
        let mut adj = vec![Vec::new(); 7];
        for (i, nbrs) in base.iter().enumerate() {
            adj[perm[i]] = nbrs.iter().map(|&j| perm[j]).collect();
        }
        let order = BfsPartitioner::ordering(&adj);
        assert_eq!(order.len(), 7);
        assert!(order[0] == perm[0] || order[0] == perm[6], "order {order:?}");
        let p = BfsPartitioner.partition(&adj, 2).unwrap();
        // each block is a contiguous piece of the path
        assert_eq!(p.boundary(&adj).len(), 2);
    }

    #[test]
    fn bfs_covers_disconnected_graphs() {
        let adj = vec![vec![1], vec![0], vec![], vec![4], vec![3]];
        let order = BfsPartitioner::ordering(&adj);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn rejects_zero_ranks() {
        assert!(BlockPartitioner.partition(&path(3), 0).is_err());
        assert!(Partition::from_owners(vec![0, 2], 2).is_err());
    }
}
