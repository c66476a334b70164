//! Markov-chain Metropolis sampling over configuration space.

mod kernel;

pub use kernel::{
    ExchangeKernel, GlobalExchangeKernel, HamiltonianKernel, LocalKernel, Proposal,
    TransitionKernel,
};

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::hilbert::Hilbert;
use crate::machine::Machine;

/// One Markov-chain walker: its configuration and the machine's lookup
/// cache for that configuration. Chains never migrate between processes.
#[derive(Clone, Debug)]
pub struct Chain<M: Machine> {
    pub v: DVector<f64>,
    pub lookup: M::Lookup,
}

/// Contract between the driver and any sampling strategy.
pub trait Sampler<M: Machine> {
    /// Re-initialize every chain (optionally to random configurations) and
    /// rebuild lookup caches. Must be called after any parameter update.
    fn reset(&mut self, psi: &M, randomize: bool);

    /// One full pass of proposals over every chain, sequential per chain.
    fn sweep(&mut self, psi: &M);

    fn n_chains(&self) -> usize;

    fn visible(&self, chain: usize) -> &DVector<f64>;

    fn set_visible(&mut self, psi: &M, chain: usize, v: DVector<f64>);

    /// Acceptance fraction per move class since the last reset.
    fn acceptance(&self) -> Vec<f64>;
}

/// Metropolis-Hastings sampler over a pluggable proposal kernel, driving
/// `n_chains` independent chains with a shared seeded generator.
pub struct MetropolisSampler<M: Machine, K: TransitionKernel> {
    hilbert: Hilbert,
    kernel: K,
    chains: Vec<Chain<M>>,
    rng: StdRng,
    accept: Vec<f64>,
    moves: Vec<f64>,
}

impl<M: Machine, K: TransitionKernel> MetropolisSampler<M, K> {
    /// `rank` decorrelates the random streams of different worker
    /// processes started from the same base seed.
    pub fn new(hilbert: Hilbert, kernel: K, n_chains: usize, seed: u64, rank: usize) -> Self {
        assert!(n_chains > 0, "sampler needs at least one chain");
        let n_classes = kernel.n_move_classes();
        let chains = (0..n_chains)
            .map(|_| Chain {
                v: DVector::zeros(hilbert.size()),
                lookup: M::Lookup::default(),
            })
            .collect();
        Self {
            hilbert,
            kernel,
            chains,
            rng: StdRng::seed_from_u64(seed.wrapping_add(0x9e3779b97f4a7c15u64.wrapping_mul(rank as u64 + 1))),
            accept: vec![0.0; n_classes],
            moves: vec![0.0; n_classes],
        }
    }

    pub fn hilbert(&self) -> &Hilbert {
        &self.hilbert
    }
}

impl<M: Machine, K: TransitionKernel> Sampler<M> for MetropolisSampler<M, K> {
    fn reset(&mut self, psi: &M, randomize: bool) {
        for chain in self.chains.iter_mut() {
            if randomize {
                self.hilbert.random_vals(&mut chain.v, &mut self.rng);
            }
            psi.init_lookup(&chain.v, &mut chain.lookup);
        }
        self.accept.iter_mut().for_each(|x| *x = 0.0);
        self.moves.iter_mut().for_each(|x| *x = 0.0);
    }

    fn sweep(&mut self, psi: &M) {
        let n_visible = self.hilbert.size();
        for chain in self.chains.iter_mut() {
            for _ in 0..n_visible {
                let proposal = self.kernel.propose(&chain.v, &mut self.rng);
                self.moves[proposal.class] += 1.0;
                if proposal.sites.is_empty() {
                    continue;
                }

                let diff =
                    psi.log_val_diff(&chain.v, &proposal.sites, &proposal.values, &chain.lookup);
                let ratio = (2.0 * diff.re + proposal.log_correction).exp();

                if ratio > self.rng.gen::<f64>() {
                    self.accept[proposal.class] += 1.0;
                    psi.update_lookup(
                        &chain.v,
                        &proposal.sites,
                        &proposal.values,
                        &mut chain.lookup,
                    );
                    self.hilbert
                        .update_conf(&mut chain.v, &proposal.sites, &proposal.values);
                }
            }
        }
    }

    fn n_chains(&self) -> usize {
        self.chains.len()
    }

    fn visible(&self, chain: usize) -> &DVector<f64> {
        &self.chains[chain].v
    }

    fn set_visible(&mut self, psi: &M, chain: usize, v: DVector<f64>) {
        let c = &mut self.chains[chain];
        c.v = v;
        psi.init_lookup(&c.v, &mut c.lookup);
    }

    fn acceptance(&self) -> Vec<f64> {
        self.accept
            .iter()
            .zip(self.moves.iter())
            .map(|(&a, &m)| if m > 0.0 { a / m } else { 0.0 })
            .collect()
    }
}
