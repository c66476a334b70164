use std::sync::Arc;
use std::thread;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::error;
use tracing_subscriber::EnvFilter;

use varmc::comm::{Communicator, LocalComm, ThreadComm};
use varmc::conf::{self, AnyKernel, MachineKind, RunConfig};
use varmc::error::Result;
use varmc::hilbert::Hilbert;
use varmc::machine::{DistanceJastrow, Jastrow, Machine};
use varmc::operator::{Operator, TransverseFieldIsing};
use varmc::sampler::MetropolisSampler;
use varmc::vmc::Vmc;

#[derive(Parser, Debug)]
#[command(version, about = "Variational Monte Carlo ground-state optimization")]
struct Args {
    /// YAML run configuration.
    #[arg(short, long, default_value = "config.yml")]
    config: String,

    /// Number of cooperating worker threads.
    #[arg(short, long, default_value_t = 1)]
    workers: usize,
}

fn run_machine<M: Machine>(
    cfg: &RunConfig,
    ham: TransverseFieldIsing,
    kernel: AnyKernel,
    psi: M,
    comm: Arc<dyn Communicator>,
) -> Result<()> {
    let n_sites = ham.hilbert().size();
    let sampler: MetropolisSampler<M, AnyKernel> = MetropolisSampler::new(
        Hilbert::spin_half(n_sites),
        kernel,
        cfg.sampler.n_chains,
        cfg.sampler.seed,
        comm.rank(),
    );
    let gs = &cfg.ground_state;
    let mut vmc = Vmc::new(
        ham,
        psi,
        sampler,
        cfg.optimizer.build(),
        gs.n_samples,
        gs.discarded,
        gs.discarded_on_init,
        gs.target.into(),
        gs.build_sr(),
        comm,
    )?;
    vmc.run(&gs.output_prefix, gs.n_iter, gs.save_every)
}

fn run_worker(cfg: &RunConfig, comm: Arc<dyn Communicator>) -> Result<()> {
    let graph = cfg.lattice.build();
    let ham = TransverseFieldIsing::new(&graph, cfg.hamiltonian.h, cfg.hamiltonian.j);
    let kernel = cfg.sampler.build_kernel(&graph, &ham)?;

    // Every worker seeds the parameter initialization identically; only the
    // sampling streams differ by rank.
    let sigma = cfg.machine.validated_sigma()?;
    let mut rng = StdRng::seed_from_u64(cfg.sampler.seed);
    match cfg.machine.kind {
        MachineKind::Jastrow => {
            let mut psi = Jastrow::new(graph.n_sites());
            psi.init_random_pars(&mut rng, sigma);
            run_machine(cfg, ham, kernel, psi, comm)
        }
        MachineKind::DistanceJastrow => {
            let mut psi = DistanceJastrow::new(&graph);
            psi.init_random_pars(&mut rng, sigma);
            run_machine(cfg, ham, kernel, psi, comm)
        }
    }
}

fn run(cfg: &RunConfig, workers: usize) -> Result<()> {
    if workers <= 1 {
        return run_worker(cfg, Arc::new(LocalComm));
    }
    let comms = ThreadComm::create(workers);
    thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| s.spawn(move || run_worker(cfg, Arc::new(comm))))
            .collect();
        let mut result = Ok(());
        for handle in handles {
            match handle.join() {
                Ok(r) => result = result.and(r),
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
        result
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = match conf::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(config = %args.config, "failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&cfg, args.workers) {
        error!("run failed: {e}");
        std::process::exit(1);
    }
}
