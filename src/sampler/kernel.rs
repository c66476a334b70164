//! Proposal kernels for the Metropolis sampler.
//!
//! A kernel turns the current configuration into a candidate local change
//! plus a log acceptance correction for non-symmetric proposal
//! distributions. An empty site list means the kernel found no usable move
//! this attempt; the sampler counts it and moves on.

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::Rng;

use crate::graph::Graph;
use crate::hilbert::Hilbert;
use crate::operator::Operator;

#[derive(Clone, Debug, Default)]
pub struct Proposal {
    pub sites: Vec<usize>,
    pub values: Vec<f64>,
    pub log_correction: f64,
    /// Move-type index for per-class acceptance bookkeeping.
    pub class: usize,
}

pub trait TransitionKernel {
    fn propose(&mut self, v: &DVector<f64>, rng: &mut StdRng) -> Proposal;

    fn n_move_classes(&self) -> usize {
        1
    }
}

/// Single-site change to a different allowed local value.
#[derive(Clone, Debug)]
pub struct LocalKernel {
    hilbert: Hilbert,
}

impl LocalKernel {
    pub fn new(hilbert: Hilbert) -> Self {
        Self { hilbert }
    }
}

impl TransitionKernel for LocalKernel {
    fn propose(&mut self, v: &DVector<f64>, rng: &mut StdRng) -> Proposal {
        let site = rng.gen_range(0..v.len());
        let states = self.hilbert.local_states();
        // Draw among the other local values.
        let mut pick = rng.gen_range(0..states.len() - 1);
        if (states[pick] - v[site]).abs() < 1e-12 {
            pick = states.len() - 1;
        }
        Proposal {
            sites: vec![site],
            values: vec![states[pick]],
            log_correction: 0.0,
            class: 0,
        }
    }
}

/// Pairwise exchange restricted to pairs within graph distance `dmax`.
/// Conserves every sum of local values, so it samples within a fixed
/// magnetization sector.
#[derive(Clone, Debug)]
pub struct ExchangeKernel {
    clusters: Vec<(usize, usize)>,
}

impl ExchangeKernel {
    pub fn new(graph: &Graph, dmax: usize) -> Self {
        let dist = graph.all_distances();
        let n = graph.n_sites();
        let mut clusters = Vec::new();
        for i in 0..n {
            for j in 0..n {
                if i != j && dist[i][j] <= dmax {
                    clusters.push((i, j));
                }
            }
        }
        assert!(!clusters.is_empty(), "no exchangeable pairs within dmax");
        Self { clusters }
    }

    fn exchange_proposal(
        clusters: &[(usize, usize)],
        v: &DVector<f64>,
        rng: &mut StdRng,
        class: usize,
    ) -> Proposal {
        let (si, sj) = clusters[rng.gen_range(0..clusters.len())];
        if (v[si] - v[sj]).abs() < f64::EPSILON {
            // Exchanging equal values is a null move.
            return Proposal {
                class,
                ..Proposal::default()
            };
        }
        Proposal {
            sites: vec![si, sj],
            values: vec![v[sj], v[si]],
            log_correction: 0.0,
            class,
        }
    }
}

impl TransitionKernel for ExchangeKernel {
    fn propose(&mut self, v: &DVector<f64>, rng: &mut StdRng) -> Proposal {
        Self::exchange_proposal(&self.clusters, v, rng, 0)
    }
}

/// Mixes local pair exchanges with whole row/column block exchanges on an
/// `L x L` lattice. Class 0 counts pair exchanges, class 1 block swaps.
#[derive(Clone, Debug)]
pub struct GlobalExchangeKernel {
    clusters: Vec<(usize, usize)>,
    extent: usize,
    block_probability: f64,
}

impl GlobalExchangeKernel {
    pub fn new(graph: &Graph, dmax: usize) -> Self {
        let extent = graph
            .extent()
            .expect("global exchange moves need a square lattice");
        let inner = ExchangeKernel::new(graph, dmax);
        Self {
            clusters: inner.clusters,
            extent,
            block_probability: 0.2,
        }
    }

    fn block_swap(&self, v: &DVector<f64>, rng: &mut StdRng) -> Proposal {
        let l = self.extent;
        let r = rng.gen_range(0..l);
        let rn = (r + 1) % l;
        let swap_cols = rng.gen::<f64>() > 0.5;

        let mut sites = Vec::new();
        let mut values = Vec::new();
        for j in 0..l {
            // Row-major layout: site = row * l + col.
            let (a, b) = if swap_cols {
                (j * l + r, j * l + rn)
            } else {
                (r * l + j, rn * l + j)
            };
            if (v[a] - v[b]).abs() > f64::EPSILON {
                sites.push(a);
                sites.push(b);
                values.push(v[b]);
                values.push(v[a]);
            }
        }
        Proposal {
            sites,
            values,
            log_correction: 0.0,
            class: 1,
        }
    }
}

impl TransitionKernel for GlobalExchangeKernel {
    fn propose(&mut self, v: &DVector<f64>, rng: &mut StdRng) -> Proposal {
        if rng.gen::<f64>() > self.block_probability {
            ExchangeKernel::exchange_proposal(&self.clusters, v, rng, 0)
        } else {
            self.block_swap(v, rng)
        }
    }

    fn n_move_classes(&self) -> usize {
        2
    }
}

/// Moves drawn from the off-diagonal connections of an operator, with the
/// `n_conn(v) / n_conn(v')` correction that keeps detailed balance when the
/// connection count varies between configurations.
#[derive(Clone, Debug)]
pub struct HamiltonianKernel<O: Operator> {
    op: O,
}

impl<O: Operator> HamiltonianKernel<O> {
    pub fn new(op: O) -> Self {
        Self { op }
    }

    fn n_offdiagonal(&self, v: &DVector<f64>) -> usize {
        let conn = self.op.find_conn(v);
        conn.sites.iter().filter(|s| !s.is_empty()).count()
    }
}

impl<O: Operator> TransitionKernel for HamiltonianKernel<O> {
    fn propose(&mut self, v: &DVector<f64>, rng: &mut StdRng) -> Proposal {
        let conn = self.op.find_conn(v);
        let moves: Vec<usize> = (0..conn.len())
            .filter(|&i| !conn.sites[i].is_empty())
            .collect();
        if moves.is_empty() {
            return Proposal::default();
        }
        let pick = moves[rng.gen_range(0..moves.len())];

        let mut vp = v.clone();
        for (&s, &x) in conn.sites[pick].iter().zip(conn.values[pick].iter()) {
            vp[s] = x;
        }
        let log_correction = (moves.len() as f64 / self.n_offdiagonal(&vp) as f64).ln();

        Proposal {
            sites: conn.sites[pick].clone(),
            values: conn.values[pick].clone(),
            log_correction,
            class: 0,
        }
    }
}
