//! YAML run configuration and the builders that turn it into engine parts.
//!
//! Example:
//!
//! ```yaml
//! lattice:
//!   kind: ring
//!   n: 16
//! hamiltonian:
//!   h: 1.0
//! sampler:
//!   kernel: local
//!   n_chains: 8
//!   seed: 42
//! optimizer:
//!   kind: sgd
//!   learning_rate: 0.05
//! ground_state:
//!   method: sr
//!   n_samples: 2000
//!   n_iter: 300
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use nalgebra::DVector;
use num_complex::Complex64;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::graph::Graph;
use crate::hilbert::Hilbert;
use crate::operator::TransverseFieldIsing;
use crate::optimizer::{Momentum, Optimizer, Sgd};
use crate::sampler::{
    ExchangeKernel, GlobalExchangeKernel, HamiltonianKernel, LocalKernel, Proposal,
    TransitionKernel,
};
use crate::sr::{LsqSolver, Sr};
use crate::vmc::Target;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    pub lattice: LatticeConfig,
    pub hamiltonian: HamiltonianConfig,
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub ground_state: GroundStateConfig,
}

pub fn load(path: impl AsRef<Path>) -> Result<RunConfig> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_yaml::from_reader(reader)?)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LatticeConfig {
    /// Periodic chain of `n` sites.
    Ring { n: usize },
    /// Periodic `l x l` square lattice.
    Square { l: usize },
}

impl LatticeConfig {
    pub fn build(&self) -> Graph {
        match *self {
            LatticeConfig::Ring { n } => Graph::ring(n),
            LatticeConfig::Square { l } => Graph::square(l),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HamiltonianConfig {
    /// Transverse field strength.
    pub h: f64,
    /// Ising coupling, ferromagnetic when positive.
    #[serde(default = "one")]
    pub j: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    Jastrow,
    DistanceJastrow,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MachineConfig {
    pub kind: MachineKind,
    /// Width of the Gaussian initializing the couplings.
    #[serde(default = "default_sigma")]
    pub sigma: f64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            kind: MachineKind::DistanceJastrow,
            sigma: default_sigma(),
        }
    }
}

impl MachineConfig {
    /// Initialization width, checked before any machine is built.
    pub fn validated_sigma(&self) -> Result<f64> {
        if !self.sigma.is_finite() || self.sigma < 0.0 {
            return Err(VmcError::InvalidInput(format!(
                "machine.sigma must be finite and non-negative, got {}",
                self.sigma
            )));
        }
        Ok(self.sigma)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    Local,
    Exchange,
    GlobalExchange,
    Hamiltonian,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SamplerConfig {
    #[serde(default = "default_kernel")]
    pub kernel: KernelKind,
    #[serde(default = "default_chains")]
    pub n_chains: usize,
    /// Maximum graph distance for exchange moves.
    #[serde(default = "one_usize")]
    pub dmax: usize,
    #[serde(default)]
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            kernel: default_kernel(),
            n_chains: default_chains(),
            dmax: 1,
            seed: 0,
        }
    }
}

impl SamplerConfig {
    pub fn build_kernel(&self, graph: &Graph, ham: &TransverseFieldIsing) -> Result<AnyKernel> {
        Ok(match self.kernel {
            KernelKind::Local => {
                AnyKernel::Local(LocalKernel::new(Hilbert::spin_half(graph.n_sites())))
            }
            KernelKind::Exchange => AnyKernel::Exchange(ExchangeKernel::new(graph, self.dmax)),
            KernelKind::GlobalExchange => {
                if graph.extent().is_none() {
                    return Err(VmcError::InvalidInput(
                        "global exchange moves require a square lattice".into(),
                    ));
                }
                AnyKernel::GlobalExchange(GlobalExchangeKernel::new(graph, self.dmax))
            }
            KernelKind::Hamiltonian => AnyKernel::Hamiltonian(HamiltonianKernel::new(ham.clone())),
        })
    }
}

/// Config-selected transition kernel.
#[derive(Clone, Debug)]
pub enum AnyKernel {
    Local(LocalKernel),
    Exchange(ExchangeKernel),
    GlobalExchange(GlobalExchangeKernel),
    Hamiltonian(HamiltonianKernel<TransverseFieldIsing>),
}

impl TransitionKernel for AnyKernel {
    fn propose(&mut self, v: &DVector<f64>, rng: &mut StdRng) -> Proposal {
        match self {
            AnyKernel::Local(k) => k.propose(v, rng),
            AnyKernel::Exchange(k) => k.propose(v, rng),
            AnyKernel::GlobalExchange(k) => k.propose(v, rng),
            AnyKernel::Hamiltonian(k) => k.propose(v, rng),
        }
    }

    fn n_move_classes(&self) -> usize {
        match self {
            AnyKernel::Local(k) => k.n_move_classes(),
            AnyKernel::Exchange(k) => k.n_move_classes(),
            AnyKernel::GlobalExchange(k) => k.n_move_classes(),
            AnyKernel::Hamiltonian(k) => k.n_move_classes(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Sgd {
        learning_rate: f64,
        #[serde(default)]
        l2_reg: f64,
        #[serde(default = "one")]
        decay_factor: f64,
    },
    Momentum {
        learning_rate: f64,
        #[serde(default = "default_beta")]
        beta: f64,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Sgd {
            learning_rate: 0.05,
            l2_reg: 0.0,
            decay_factor: 1.0,
        }
    }
}

impl OptimizerConfig {
    pub fn build(&self) -> AnyOptimizer {
        match *self {
            OptimizerConfig::Sgd {
                learning_rate,
                l2_reg,
                decay_factor,
            } => AnyOptimizer::Sgd(
                Sgd::new(learning_rate)
                    .with_l2_reg(l2_reg)
                    .with_decay_factor(decay_factor),
            ),
            OptimizerConfig::Momentum {
                learning_rate,
                beta,
            } => AnyOptimizer::Momentum(Momentum::new(learning_rate, beta)),
        }
    }
}

/// Config-selected update rule.
#[derive(Clone, Debug)]
pub enum AnyOptimizer {
    Sgd(Sgd),
    Momentum(Momentum),
}

impl Optimizer for AnyOptimizer {
    fn init(&mut self, n_par: usize) {
        match self {
            AnyOptimizer::Sgd(o) => o.init(n_par),
            AnyOptimizer::Momentum(o) => o.init(n_par),
        }
    }

    fn reset(&mut self) {
        match self {
            AnyOptimizer::Sgd(o) => o.reset(),
            AnyOptimizer::Momentum(o) => o.reset(),
        }
    }

    fn update(&mut self, delta: &DVector<Complex64>, pars: &mut DVector<Complex64>) {
        match self {
            AnyOptimizer::Sgd(o) => o.update(delta, pars),
            AnyOptimizer::Momentum(o) => o.update(delta, pars),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    /// Stochastic reconfiguration (natural gradient).
    Sr,
    /// Plain gradient descent on the raw gradient.
    Gd,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Energy,
    Variance,
}

impl From<TargetKind> for Target {
    fn from(kind: TargetKind) -> Target {
        match kind {
            TargetKind::Energy => Target::Energy,
            TargetKind::Variance => Target::Variance,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    Llt,
    ColPivQr,
}

impl From<SolverKind> for LsqSolver {
    fn from(kind: SolverKind) -> LsqSolver {
        match kind {
            SolverKind::Llt => LsqSolver::Llt,
            SolverKind::ColPivQr => LsqSolver::ColPivQr,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroundStateConfig {
    #[serde(default = "default_method")]
    pub method: MethodKind,
    #[serde(default = "default_target")]
    pub target: TargetKind,
    #[serde(default = "default_samples")]
    pub n_samples: usize,
    /// Optimization steps to run; absent means run indefinitely.
    #[serde(default)]
    pub n_iter: Option<usize>,
    /// Sweeps discarded before each batch; defaults to a tenth of the
    /// per-chain quota when absent.
    #[serde(default)]
    pub discarded: Option<usize>,
    /// Warm-up sweeps after randomizing the chains; defaults to a full
    /// batch when absent.
    #[serde(default)]
    pub discarded_on_init: Option<usize>,
    #[serde(default = "default_diag_shift")]
    pub diag_shift: f64,
    #[serde(default)]
    pub rescale_shift: bool,
    #[serde(default)]
    pub use_iterative: bool,
    #[serde(default = "default_solver")]
    pub solver: SolverKind,
    #[serde(default = "default_save_every")]
    pub save_every: usize,
    #[serde(default = "default_prefix")]
    pub output_prefix: String,
}

impl Default for GroundStateConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            target: default_target(),
            n_samples: default_samples(),
            n_iter: None,
            discarded: None,
            discarded_on_init: None,
            diag_shift: default_diag_shift(),
            rescale_shift: false,
            use_iterative: false,
            solver: default_solver(),
            save_every: default_save_every(),
            output_prefix: default_prefix(),
        }
    }
}

impl GroundStateConfig {
    pub fn build_sr(&self) -> Option<Sr> {
        match self.method {
            MethodKind::Sr => Some(Sr::new(
                self.solver.into(),
                self.diag_shift,
                self.use_iterative,
                self.rescale_shift,
            )),
            MethodKind::Gd => None,
        }
    }
}

fn one() -> f64 {
    1.0
}

fn one_usize() -> usize {
    1
}

fn default_sigma() -> f64 {
    0.01
}

fn default_kernel() -> KernelKind {
    KernelKind::Local
}

fn default_chains() -> usize {
    16
}

fn default_beta() -> f64 {
    0.9
}

fn default_method() -> MethodKind {
    MethodKind::Sr
}

fn default_target() -> TargetKind {
    TargetKind::Energy
}

fn default_samples() -> usize {
    1000
}

fn default_diag_shift() -> f64 {
    0.01
}

fn default_solver() -> SolverKind {
    SolverKind::Llt
}

fn default_save_every() -> usize {
    50
}

fn default_prefix() -> String {
    "vmc".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let yaml = "
lattice:
  kind: ring
  n: 16
hamiltonian:
  h: 1.0
";
        let cfg: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.lattice.build().n_sites(), 16);
        assert_eq!(cfg.hamiltonian.j, 1.0);
        assert_eq!(cfg.sampler.n_chains, 16);
        assert!(matches!(cfg.ground_state.method, MethodKind::Sr));
        assert!(cfg.ground_state.build_sr().is_some());
        // No configured count means the driver runs indefinitely.
        assert!(cfg.ground_state.n_iter.is_none());
        assert_eq!(cfg.ground_state.output_prefix, "vmc");
    }

    #[test]
    fn full_config_round_trips() {
        let yaml = "
lattice:
  kind: square
  l: 4
hamiltonian:
  h: 3.0
  j: 1.0
machine:
  kind: jastrow
  sigma: 0.05
sampler:
  kernel: global_exchange
  n_chains: 4
  dmax: 2
  seed: 7
optimizer:
  kind: momentum
  learning_rate: 0.01
  beta: 0.8
ground_state:
  method: gd
  target: variance
  n_samples: 500
  n_iter: 20
  use_iterative: true
  solver: col_piv_qr
  output_prefix: run1
";
        let cfg: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.lattice.build().extent(), Some(4));
        assert!(matches!(cfg.sampler.kernel, KernelKind::GlobalExchange));
        assert_eq!(cfg.ground_state.n_iter, Some(20));
        assert!(cfg.ground_state.build_sr().is_none());
        assert!(matches!(
            Target::from(cfg.ground_state.target),
            Target::Variance
        ));

        let back = serde_yaml::to_string(&cfg).unwrap();
        let again: RunConfig = serde_yaml::from_str(&back).unwrap();
        assert_eq!(again.sampler.seed, 7);
    }

    #[test]
    fn unknown_solver_name_is_rejected() {
        let yaml = "
lattice:
  kind: ring
  n: 4
hamiltonian:
  h: 1.0
ground_state:
  solver: lu
";
        assert!(serde_yaml::from_str::<RunConfig>(yaml).is_err());
    }

    #[test]
    fn negative_or_non_finite_sigma_is_rejected() {
        let mut cfg = MachineConfig::default();
        assert!(cfg.validated_sigma().is_ok());
        cfg.sigma = -0.1;
        assert!(cfg.validated_sigma().is_err());
        cfg.sigma = f64::NAN;
        assert!(cfg.validated_sigma().is_err());
        cfg.sigma = f64::INFINITY;
        assert!(cfg.validated_sigma().is_err());
        cfg.sigma = 0.0;
        assert!(cfg.validated_sigma().is_ok());
    }

    #[test]
    fn global_exchange_on_a_ring_is_rejected() {
        let graph = Graph::ring(6);
        let ham = TransverseFieldIsing::new(&graph, 1.0, 1.0);
        let cfg = SamplerConfig {
            kernel: KernelKind::GlobalExchange,
            ..SamplerConfig::default()
        };
        assert!(cfg.build_kernel(&graph, &ham).is_err());
    }

    #[test]
    fn kernel_builders_cover_every_kind() {
        let graph = Graph::square(3);
        let ham = TransverseFieldIsing::new(&graph, 1.0, 1.0);
        for kind in [
            KernelKind::Local,
            KernelKind::Exchange,
            KernelKind::GlobalExchange,
            KernelKind::Hamiltonian,
        ] {
            let cfg = SamplerConfig {
                kernel: kind,
                ..SamplerConfig::default()
            };
            let kernel = cfg.build_kernel(&graph, &ham).unwrap();
            assert!(kernel.n_move_classes() >= 1);
        }
    }
}
