//! The optimization driver: sample, estimate, solve, update, synchronize.
//!
//! Each step draws a fresh Markov-chain batch, reduces energy statistics and
//! the sampled gradient across all workers, optionally passes the gradient
//! through the stochastic-reconfiguration solve, applies the optimizer rule,
//! and broadcasts the coordinator's parameters so every worker continues
//! from a bit-identical state.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use tracing::info;

use crate::comm::Communicator;
use crate::error::{Result, VmcError};
use crate::machine::Machine;
use crate::operator::{local_value_deriv, local_values, Operator};
use crate::optimizer::Optimizer;
use crate::output::{log_record, OutputWriter};
use crate::sampler::Sampler;
use crate::sr::Sr;
use crate::stats::{gradient, statistics, subtract_mean, Stats};

/// Which scalar the optimization descends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Energy,
    Variance,
}

/// One step's worth of samples from this worker's chains.
///
/// Rows are time-major and chain-interleaved: sample `p` of chain `c` is row
/// `p * n_chains + c`, matching the layout the statistics reduction expects.
/// The log-derivatives are centered by the global mean.
pub struct SampleBatch {
    pub samples: DMatrix<f64>,
    pub der_logs: DMatrix<Complex64>,
    pub n_chains: usize,
}

/// Discard `n_discard` sweeps, then record `samples_per_chain` sweeps of
/// configurations and centered log-derivatives.
pub fn compute_samples<M: Machine, S: Sampler<M>>(
    sampler: &mut S,
    psi: &M,
    samples_per_chain: usize,
    n_discard: usize,
    comm: &dyn Communicator,
) -> SampleBatch {
    for _ in 0..n_discard {
        sampler.sweep(psi);
    }

    let n_chains = sampler.n_chains();
    let rows = samples_per_chain * n_chains;
    let mut samples = DMatrix::zeros(rows, psi.n_visible());
    let mut der_logs = DMatrix::zeros(rows, psi.n_par());

    for p in 0..samples_per_chain {
        sampler.sweep(psi);
        for c in 0..n_chains {
            let row = p * n_chains + c;
            samples.row_mut(row).copy_from(&sampler.visible(c).transpose());
            der_logs
                .row_mut(row)
                .copy_from(&psi.der_log(sampler.visible(c)).transpose());
        }
    }
    subtract_mean(&mut der_logs, comm);

    SampleBatch {
        samples,
        der_logs,
        n_chains,
    }
}

/// Per-step observable estimates in insertion order, "Energy" first.
#[derive(Default)]
pub struct ObservableStore {
    entries: Vec<(String, Stats)>,
}

impl ObservableStore {
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn insert(&mut self, name: &str, stats: Stats) {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| n == name) {
            entry.1 = stats;
        } else {
            self.entries.push((name.to_string(), stats));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Stats> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Stats)> {
        self.entries.iter()
    }
}

/// Variational Monte Carlo optimization loop.
pub struct Vmc<M, S, H, O>
where
    M: Machine,
    S: Sampler<M>,
    H: Operator,
    O: Optimizer,
{
    ham: H,
    psi: M,
    sampler: S,
    opt: O,
    sr: Option<Sr>,
    comm: Arc<dyn Communicator>,
    target: Target,
    samples_per_chain: usize,
    n_discard: usize,
    n_init_discard: usize,
    observables: Vec<(String, Box<dyn Operator>)>,
    stats: ObservableStore,
    last_grad_norm: f64,
    last_update_norm: f64,
    last_acceptance: Vec<f64>,
    iteration: usize,
}

impl<M, S, H, O> Vmc<M, S, H, O>
where
    M: Machine,
    S: Sampler<M>,
    H: Operator,
    O: Optimizer,
{
    /// `n_samples` is the global per-step budget; it is split evenly over
    /// workers, then over this worker's chains, rounding up so every chain
    /// records at least one sweep. `discarded` is the per-step warm-up and
    /// defaults to a tenth of the per-chain quota; `discarded_on_init` is
    /// the larger warm-up after (re)randomizing the chains and defaults to
    /// a full batch of sweeps.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ham: H,
        psi: M,
        mut sampler: S,
        mut opt: O,
        n_samples: usize,
        discarded: Option<usize>,
        discarded_on_init: Option<usize>,
        target: Target,
        sr: Option<Sr>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        if n_samples == 0 {
            return Err(VmcError::InvalidInput(
                "number of samples per step must be positive".into(),
            ));
        }
        if ham.hilbert().size() != psi.n_visible() {
            return Err(VmcError::InvalidInput(format!(
                "Hamiltonian acts on {} sites but the machine has {} visible units",
                ham.hilbert().size(),
                psi.n_visible()
            )));
        }

        let n_samples_node = n_samples.div_ceil(comm.size());
        let samples_per_chain = n_samples_node.div_ceil(sampler.n_chains()).max(1);
        let n_discard = discarded.unwrap_or(samples_per_chain / 10).max(1);
        let n_init_discard = discarded_on_init.unwrap_or(samples_per_chain);

        opt.init(psi.n_par());
        sampler.reset(&psi, true);
        for _ in 0..n_init_discard {
            sampler.sweep(&psi);
        }

        if comm.rank() == 0 {
            info!(
                n_par = psi.n_par(),
                n_chains = sampler.n_chains(),
                samples_per_chain,
                n_discard,
                workers = comm.size(),
                sr = sr.is_some(),
                "variational Monte Carlo driver ready"
            );
        }
        comm.barrier();

        Ok(Self {
            ham,
            psi,
            sampler,
            opt,
            sr,
            comm,
            target,
            samples_per_chain,
            n_discard,
            n_init_discard,
            observables: Vec::new(),
            stats: ObservableStore::default(),
            last_grad_norm: 0.0,
            last_update_norm: 0.0,
            last_acceptance: Vec::new(),
            iteration: 0,
        })
    }

    /// Register an extra operator estimated on every step's batch. Names
    /// must be unique; "Energy" is reserved for the Hamiltonian.
    pub fn add_observable(&mut self, name: &str, op: Box<dyn Operator>) -> Result<()> {
        if name == "Energy" || self.observables.iter().any(|(n, _)| n == name) {
            return Err(VmcError::InvalidInput(format!(
                "observable name already in use: {name}"
            )));
        }
        self.observables.push((name.to_string(), op));
        Ok(())
    }

    pub fn machine(&self) -> &M {
        &self.psi
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Latest estimates; `get("Energy")` is always present after a step.
    pub fn observables(&self) -> &ObservableStore {
        &self.stats
    }

    pub fn last_acceptance(&self) -> &[f64] {
        &self.last_acceptance
    }

    /// Replace the machine parameters (e.g. from a saved snapshot) and
    /// rebuild every chain's lookup cache.
    pub fn set_parameters(&mut self, pars: &DVector<Complex64>) -> Result<()> {
        if pars.len() != self.psi.n_par() {
            return Err(VmcError::InvalidInput(format!(
                "parameter snapshot has {} entries, machine expects {}",
                pars.len(),
                self.psi.n_par()
            )));
        }
        self.psi.set_parameters(pars);
        self.sampler.reset(&self.psi, false);
        Ok(())
    }

    /// Restart the optimization: clear optimizer state, re-randomize chains
    /// and re-thermalize.
    pub fn reset(&mut self) {
        self.opt.reset();
        self.sampler.reset(&self.psi, true);
        for _ in 0..self.n_init_discard {
            self.sampler.sweep(&self.psi);
        }
        self.iteration = 0;
    }

    pub fn advance(&mut self, steps: usize) -> Result<()> {
        for _ in 0..steps {
            self.single_step()?;
        }
        Ok(())
    }

    fn single_step(&mut self) -> Result<()> {
        let batch = compute_samples(
            &mut self.sampler,
            &self.psi,
            self.samples_per_chain,
            self.n_discard,
            self.comm.as_ref(),
        );
        let locals = local_values(&self.ham, &self.psi, &batch.samples);

        self.stats.clear();
        let energy = statistics(locals.as_slice(), batch.n_chains, self.comm.as_ref())?;
        self.stats.insert("Energy", energy);
        for (name, op) in &self.observables {
            let vals = local_values(op.as_ref(), &self.psi, &batch.samples);
            let s = statistics(vals.as_slice(), batch.n_chains, self.comm.as_ref())?;
            self.stats.insert(name, s);
        }

        let grad = match self.target {
            Target::Energy => gradient(&locals, &batch.der_logs, self.comm.as_ref()),
            Target::Variance => self.variance_gradient(&batch, &locals),
        };
        self.last_grad_norm = grad.norm();

        let delta = match &self.sr {
            Some(sr) => sr.compute_update(&batch.der_logs, &grad, self.comm.as_ref())?,
            None => grad,
        };
        self.last_update_norm = delta.norm();
        self.last_acceptance = self.sampler.acceptance();

        let mut pars = self.psi.parameters();
        self.opt.update(&delta, &mut pars);
        // The coordinator's parameters are authoritative: every worker
        // continues from bit-identical values.
        self.comm.broadcast_c64(pars.as_mut_slice(), 0);
        self.psi.set_parameters(&pars);
        self.comm.barrier();
        self.sampler.reset(&self.psi, false);

        self.iteration += 1;
        Ok(())
    }

    /// Gradient of the local-energy variance,
    /// `F_k = 2 <conj(d E_loc / d p_k) (E_loc - <E_loc>)>`.
    fn variance_gradient(
        &self,
        batch: &SampleBatch,
        locals: &DVector<Complex64>,
    ) -> DVector<Complex64> {
        let rows = batch.samples.nrows();
        let mut deriv = DMatrix::zeros(rows, self.psi.n_par());
        for k in 0..rows {
            let v: DVector<f64> = batch.samples.row(k).transpose();
            deriv
                .row_mut(k)
                .copy_from(&local_value_deriv(&self.ham, &self.psi, &v).transpose());
        }
        subtract_mean(&mut deriv, self.comm.as_ref());
        gradient(locals, &deriv, self.comm.as_ref()) * Complex64::new(2.0, 0.0)
    }

    /// Run until the configured iteration count is reached, or indefinitely
    /// when none is given, writing a JSON log line and periodic parameter
    /// snapshots from the coordinator.
    pub fn run(
        &mut self,
        output_prefix: &str,
        n_iter: Option<usize>,
        save_every: usize,
    ) -> Result<()> {
        let mut writer = if self.comm.rank() == 0 {
            Some(OutputWriter::new(output_prefix, save_every)?)
        } else {
            None
        };

        let mut remaining = n_iter;
        loop {
            if let Some(n) = remaining {
                if n == 0 {
                    break;
                }
                remaining = Some(n - 1);
            }
            self.single_step()?;
            if let Some(w) = writer.as_mut() {
                let record = log_record(
                    self.iteration,
                    &self.stats,
                    self.last_grad_norm,
                    self.last_update_norm,
                    &self.last_acceptance,
                );
                w.write_log(&record)?;
                w.write_state(self.iteration, &self.psi.parameters())?;
                if let Some(stats) = self.stats.get("Energy") {
                    info!(
                        iteration = self.iteration,
                        energy = stats.mean.re,
                        sigma = stats.error_of_mean,
                        r_hat = stats.r_hat,
                        "optimization step"
                    );
                }
            }
            self.comm.barrier();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalComm;
    use crate::graph::Graph;
    use crate::hilbert::Hilbert;
    use crate::machine::DistanceJastrow;
    use crate::operator::TransverseFieldIsing;
    use crate::optimizer::Sgd;
    use crate::sampler::{LocalKernel, MetropolisSampler};
    use crate::sr::LsqSolver;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn driver(
        sr: Option<Sr>,
        target: Target,
    ) -> Vmc<DistanceJastrow, MetropolisSampler<DistanceJastrow, LocalKernel>, TransverseFieldIsing, Sgd>
    {
        let graph = Graph::ring(4);
        let ham = TransverseFieldIsing::new(&graph, 1.0, 1.0);
        let mut psi = DistanceJastrow::new(&graph);
        let mut rng = StdRng::seed_from_u64(17);
        psi.init_random_pars(&mut rng, 0.1);
        let sampler = MetropolisSampler::new(Hilbert::spin_half(4), LocalKernel::new(Hilbert::spin_half(4)), 2, 5, 0);
        Vmc::new(
            ham,
            psi,
            sampler,
            Sgd::new(0.05),
            200,
            Some(5),
            None,
            target,
            sr,
            Arc::new(LocalComm),
        )
        .unwrap()
    }

    #[test]
    fn store_replaces_without_reordering() {
        let mut store = ObservableStore::default();
        let s = Stats {
            mean: Complex64::new(1.0, 0.0),
            error_of_mean: 0.0,
            variance: 0.0,
            correlation: 0.0,
            r_hat: 1.0,
        };
        store.insert("Energy", s);
        store.insert("SzSz", s);
        let mut s2 = s;
        s2.mean = Complex64::new(-2.0, 0.0);
        store.insert("Energy", s2);
        let names: Vec<&str> = store.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Energy", "SzSz"]);
        assert_eq!(store.get("Energy").unwrap().mean.re, -2.0);
    }

    #[test]
    fn batch_layout_is_chain_interleaved_and_centered() {
        let graph = Graph::ring(6);
        let mut psi = DistanceJastrow::new(&graph);
        let mut rng = StdRng::seed_from_u64(2);
        psi.init_random_pars(&mut rng, 0.2);

        let mut sampler: MetropolisSampler<DistanceJastrow, _> = MetropolisSampler::new(
            Hilbert::spin_half(6),
            LocalKernel::new(Hilbert::spin_half(6)),
            3,
            11,
            0,
        );
        sampler.reset(&psi, true);
        let batch = compute_samples(&mut sampler, &psi, 20, 2, &LocalComm);

        assert_eq!(batch.samples.nrows(), 60);
        assert_eq!(batch.samples.ncols(), 6);
        assert_eq!(batch.n_chains, 3);
        // Last recorded sweep of chain c must match the sampler state.
        for c in 0..3 {
            let row: DVector<f64> = batch.samples.row(19 * 3 + c).transpose();
            assert_eq!(&row, sampler.visible(c));
        }
        for col in 0..batch.der_logs.ncols() {
            assert!(batch.der_logs.column(col).sum().norm() < 1e-10);
        }
    }

    #[test]
    fn rejects_zero_sample_budget() {
        let graph = Graph::ring(4);
        let ham = TransverseFieldIsing::new(&graph, 1.0, 1.0);
        let psi = DistanceJastrow::new(&graph);
        let sampler: MetropolisSampler<DistanceJastrow, _> = MetropolisSampler::new(
            Hilbert::spin_half(4),
            LocalKernel::new(Hilbert::spin_half(4)),
            1,
            0,
            0,
        );
        let result = Vmc::new(
            ham,
            psi,
            sampler,
            Sgd::new(0.1),
            0,
            None,
            None,
            Target::Energy,
            None,
            Arc::new(LocalComm),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_mismatched_sizes() {
        let graph = Graph::ring(4);
        let ham = TransverseFieldIsing::new(&graph, 1.0, 1.0);
        let psi = DistanceJastrow::new(&Graph::ring(6));
        let sampler: MetropolisSampler<DistanceJastrow, _> = MetropolisSampler::new(
            Hilbert::spin_half(6),
            LocalKernel::new(Hilbert::spin_half(6)),
            1,
            0,
            0,
        );
        let result = Vmc::new(
            ham,
            psi,
            sampler,
            Sgd::new(0.1),
            100,
            None,
            None,
            Target::Energy,
            None,
            Arc::new(LocalComm),
        );
        assert!(result.is_err());
    }

    #[test]
    fn gradient_descent_steps_produce_finite_estimates() {
        let mut vmc = driver(None, Target::Energy);
        vmc.advance(3).unwrap();
        assert_eq!(vmc.iteration(), 3);
        let energy = vmc.observables().get("Energy").unwrap();
        assert!(energy.mean.re.is_finite());
        assert!(energy.r_hat.is_finite());
        assert!(vmc.last_acceptance()[0] > 0.0);
    }

    #[test]
    fn sr_steps_produce_finite_estimates() {
        let sr = Sr::new(LsqSolver::Llt, 0.1, false, false);
        let mut vmc = driver(Some(sr), Target::Energy);
        vmc.advance(2).unwrap();
        let energy = vmc.observables().get("Energy").unwrap();
        assert!(energy.mean.re.is_finite());
    }

    #[test]
    fn variance_target_steps_run() {
        let mut vmc = driver(None, Target::Variance);
        vmc.advance(2).unwrap();
        assert!(vmc.observables().get("Energy").unwrap().mean.re.is_finite());
    }

    #[test]
    fn run_stops_at_the_configured_iteration_count() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("run").to_str().unwrap().to_string();

        let mut vmc = driver(None, Target::Energy);
        vmc.run(&prefix, Some(3), 1).unwrap();
        assert_eq!(vmc.iteration(), 3);

        let log = std::fs::read_to_string(format!("{prefix}.log")).unwrap();
        assert_eq!(log.lines().count(), 3);
        assert!(dir.path().join("run.wf").exists());
    }

    #[test]
    fn duplicate_observable_names_are_rejected() {
        let mut vmc = driver(None, Target::Energy);
        let graph = Graph::ring(4);
        let op = TransverseFieldIsing::new(&graph, 0.5, 1.0);
        vmc.add_observable("Field", Box::new(op.clone())).unwrap();
        assert!(vmc.add_observable("Field", Box::new(op.clone())).is_err());
        assert!(vmc.add_observable("Energy", Box::new(op)).is_err());
    }
}
