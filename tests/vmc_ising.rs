//! End-to-end ground-state optimization of the transverse-field Ising chain,
//! checked against exact diagonalization of the small system.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;

use varmc::comm::{Communicator, LocalComm, ThreadComm};
use varmc::graph::Graph;
use varmc::hilbert::Hilbert;
use varmc::machine::{DistanceJastrow, Machine};
use varmc::operator::{local_value, TransverseFieldIsing};
use varmc::optimizer::Sgd;
use varmc::output::{load_parameters, save_parameters};
use varmc::sampler::{LocalKernel, MetropolisSampler, Sampler};
use varmc::sr::{LsqSolver, Sr};
use varmc::vmc::{compute_samples, Target, Vmc};

/// Exact ground-state energy of the TFI Hamiltonian on `graph` by dense
/// diagonalization over all `2^n` spin configurations.
fn exact_ground_energy(graph: &Graph, h: f64, j: f64) -> f64 {
    let n = graph.n_sites();
    assert!(n <= 12, "dense diagonalization only for small systems");
    let dim = 1 << n;

    let spin = |b: usize, i: usize| if (b >> i) & 1 == 1 { -1.0 } else { 1.0 };
    let mut m = DMatrix::<f64>::zeros(dim, dim);
    for b in 0..dim {
        let diag: f64 = graph
            .edges()
            .iter()
            .map(|&(i, k)| spin(b, i) * spin(b, k))
            .sum();
        m[(b, b)] = -j * diag;
        for i in 0..n {
            m[(b ^ (1 << i), b)] = -h;
        }
    }
    let eig = m.symmetric_eigen();
    eig.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min)
}

/// Exact variational energy `<psi|H|psi> / <psi|psi>` of the current ansatz,
/// free of sampling noise.
fn variational_energy<M: Machine>(psi: &M, ham: &TransverseFieldIsing, n: usize) -> f64 {
    let dim = 1 << n;
    let mut num = 0.0;
    let mut den = 0.0;
    for b in 0..dim {
        let v = DVector::from_fn(n, |i, _| if (b >> i) & 1 == 1 { -1.0 } else { 1.0 });
        let weight = (2.0 * psi.log_val(&v).re).exp();
        num += weight * local_value(ham, psi, &v).re;
        den += weight;
    }
    num / den
}

fn ring_driver(
    seed: u64,
    sr: Option<Sr>,
) -> (
    Vmc<DistanceJastrow, MetropolisSampler<DistanceJastrow, LocalKernel>, TransverseFieldIsing, Sgd>,
    Graph,
) {
    let graph = Graph::ring(4);
    let ham = TransverseFieldIsing::new(&graph, 1.0, 1.0);
    let mut psi = DistanceJastrow::new(&graph);
    let mut rng = StdRng::seed_from_u64(seed);
    psi.init_random_pars(&mut rng, 0.05);

    let sampler = MetropolisSampler::new(
        Hilbert::spin_half(4),
        LocalKernel::new(Hilbert::spin_half(4)),
        2,
        seed,
        0,
    );
    let vmc = Vmc::new(
        ham,
        psi,
        sampler,
        Sgd::new(0.05),
        1000,
        Some(10),
        None,
        Target::Energy,
        sr,
        Arc::new(LocalComm),
    )
    .unwrap();
    (vmc, graph)
}

#[test]
fn gradient_descent_reaches_the_ground_state() {
    let (mut vmc, graph) = ring_driver(21, None);
    vmc.advance(50).unwrap();

    let ham = TransverseFieldIsing::new(&graph, 1.0, 1.0);
    let e0 = exact_ground_energy(&graph, 1.0, 1.0);

    let energy = vmc.observables().get("Energy").unwrap();
    assert!(
        (energy.mean.re - e0).abs() < 0.05 * e0.abs(),
        "reported mean = {}, e0 = {e0}",
        energy.mean.re
    );
    assert!(energy.r_hat.is_finite());

    // Noise-free check of the optimized ansatz itself.
    let e_var = variational_energy(vmc.machine(), &ham, 4);
    assert!(e_var >= e0 - 1e-9, "e_var = {e_var} below e0 = {e0}");
    assert!(
        (e_var - e0).abs() < 0.05 * e0.abs(),
        "e_var = {e_var}, e0 = {e0}"
    );
}

#[test]
fn sr_optimization_reaches_the_ground_state() {
    let sr = Sr::new(LsqSolver::Llt, 0.1, false, false);
    let (mut vmc, graph) = ring_driver(33, Some(sr));
    vmc.advance(60).unwrap();

    let ham = TransverseFieldIsing::new(&graph, 1.0, 1.0);
    let e0 = exact_ground_energy(&graph, 1.0, 1.0);
    let e_var = variational_energy(vmc.machine(), &ham, 4);
    assert!(
        (e_var - e0).abs() < 0.05 * e0.abs(),
        "e_var = {e_var}, e0 = {e0}"
    );
}

#[test]
fn saved_parameters_reproduce_identical_sampling() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.wf");

    let (mut vmc, graph) = ring_driver(5, None);
    vmc.advance(5).unwrap();
    save_parameters(&path, vmc.iteration(), &vmc.machine().parameters()).unwrap();

    let (iteration, pars) = load_parameters(&path).unwrap();
    assert_eq!(iteration, 5);

    let mut restored = DistanceJastrow::new(&graph);
    restored.set_parameters(&pars);

    // Same seed, same parameters: both samplers must retrace the exact same
    // trajectory and produce bitwise-equal local energies.
    let ham = TransverseFieldIsing::new(&graph, 1.0, 1.0);
    let run = |psi: &DistanceJastrow| {
        let mut sampler: MetropolisSampler<DistanceJastrow, _> = MetropolisSampler::new(
            Hilbert::spin_half(4),
            LocalKernel::new(Hilbert::spin_half(4)),
            2,
            123,
            0,
        );
        sampler.reset(psi, true);
        let batch = compute_samples(&mut sampler, psi, 25, 5, &LocalComm);
        varmc::operator::local_values(&ham, psi, &batch.samples)
    };

    let a = run(vmc.machine());
    let b = run(&restored);
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.re.to_bits(), y.re.to_bits());
        assert_eq!(x.im.to_bits(), y.im.to_bits());
    }
}

#[test]
fn thread_workers_stay_parameter_synchronized() {
    let comms = ThreadComm::create(2);
    let results: Vec<DVector<Complex64>> = std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                s.spawn(move || {
                    let rank = comm.rank();
                    let graph = Graph::ring(4);
                    let ham = TransverseFieldIsing::new(&graph, 1.0, 1.0);
                    let mut psi = DistanceJastrow::new(&graph);
                    let mut rng = StdRng::seed_from_u64(9);
                    psi.init_random_pars(&mut rng, 0.05);

                    let sampler = MetropolisSampler::new(
                        Hilbert::spin_half(4),
                        LocalKernel::new(Hilbert::spin_half(4)),
                        2,
                        9,
                        rank,
                    );
                    let sr = Sr::new(LsqSolver::Llt, 0.1, false, false);
                    let mut vmc = Vmc::new(
                        ham,
                        psi,
                        sampler,
                        Sgd::new(0.05),
                        400,
                        Some(5),
                        None,
                        Target::Energy,
                        Some(sr),
                        Arc::new(comm),
                    )
                    .unwrap();
                    vmc.advance(10).unwrap();
                    vmc.machine().parameters()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results[0].len(), results[1].len());
    for (a, b) in results[0].iter().zip(results[1].iter()) {
        assert_eq!(a.re.to_bits(), b.re.to_bits());
        assert_eq!(a.im.to_bits(), b.im.to_bits());
    }
}
