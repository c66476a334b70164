//! Lattice connectivity used by the Hamiltonian and the exchange kernels.

use std::collections::VecDeque;

/// Undirected graph over lattice sites.
#[derive(Clone, Debug)]
pub struct Graph {
    n_sites: usize,
    edges: Vec<(usize, usize)>,
    /// Side length when the graph is an L x L square lattice, used by the
    /// row/column block-exchange moves.
    extent: Option<usize>,
}

impl Graph {
    /// One-dimensional ring of `n` sites with periodic boundaries.
    pub fn ring(n: usize) -> Self {
        assert!(n >= 2, "ring needs at least two sites");
        let edges = (0..n).map(|i| (i, (i + 1) % n)).collect();
        Self {
            n_sites: n,
            edges,
            extent: None,
        }
    }

    /// Square lattice of `l * l` sites with periodic boundaries, row-major.
    pub fn square(l: usize) -> Self {
        assert!(l >= 2, "square lattice needs extent >= 2");
        let mut edges = Vec::with_capacity(2 * l * l);
        for r in 0..l {
            for c in 0..l {
                let i = r * l + c;
                edges.push((i, r * l + (c + 1) % l));
                edges.push((i, ((r + 1) % l) * l + c));
            }
        }
        Self {
            n_sites: l * l,
            edges,
            extent: Some(l),
        }
    }

    /// Graph from an explicit edge list.
    pub fn custom(n_sites: usize, edges: Vec<(usize, usize)>) -> Self {
        assert!(
            edges.iter().all(|&(i, j)| i < n_sites && j < n_sites),
            "edge endpoint out of range"
        );
        Self {
            n_sites,
            edges,
            extent: None,
        }
    }

    pub fn n_sites(&self) -> usize {
        self.n_sites
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn extent(&self) -> Option<usize> {
        self.extent
    }

    fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); self.n_sites];
        for &(i, j) in &self.edges {
            if i != j {
                adj[i].push(j);
                adj[j].push(i);
            }
        }
        adj
    }

    /// All-pairs shortest-path distances by BFS from every site.
    /// Unreachable pairs get `usize::MAX`.
    pub fn all_distances(&self) -> Vec<Vec<usize>> {
        let adj = self.adjacency();
        (0..self.n_sites)
            .map(|start| {
                let mut dist = vec![usize::MAX; self.n_sites];
                dist[start] = 0;
                let mut queue = VecDeque::from([start]);
                while let Some(i) = queue.pop_front() {
                    for &j in &adj[i] {
                        if dist[j] == usize::MAX {
                            dist[j] = dist[i] + 1;
                            queue.push_back(j);
                        }
                    }
                }
                dist
            })
            .collect()
    }
}
