//! Variational Monte Carlo with stochastic reconfiguration.
//!
//! The engine optimizes a parameterized wavefunction over a discrete
//! configuration space: a Metropolis sampler draws configurations from
//! `|psi|^2`, local estimators turn them into energy statistics and
//! gradients, and the natural-gradient (stochastic reconfiguration) solve
//! preconditions the update. Multiple worker processes cooperate through an
//! explicit [`comm::Communicator`], each owning its own chains and sharing
//! only reductions and parameter broadcasts.

pub mod comm;
pub mod conf;
pub mod error;
pub mod graph;
pub mod hilbert;
pub mod machine;
pub mod operator;
pub mod optimizer;
pub mod output;
pub mod sampler;
pub mod sr;
pub mod stats;
pub mod vmc;

pub use comm::{Communicator, LocalComm, ThreadComm};
pub use error::{Result, VmcError};
pub use graph::Graph;
pub use hilbert::Hilbert;
pub use machine::{DistanceJastrow, Jastrow, Machine};
pub use operator::{local_value, local_values, Connections, Operator, TransverseFieldIsing};
pub use optimizer::{Momentum, Optimizer, Sgd};
pub use sampler::{
    ExchangeKernel, GlobalExchangeKernel, HamiltonianKernel, LocalKernel, MetropolisSampler,
    Sampler, TransitionKernel,
};
pub use sr::{LsqSolver, Sr};
pub use stats::{statistics, Stats};
pub use vmc::{Target, Vmc};
