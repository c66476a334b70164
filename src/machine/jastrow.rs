//! Pairwise Jastrow wavefunctions on a lattice.
//!
//! `Jastrow` carries an independent complex coupling for every site pair,
//! `log psi(v) = sum_{i<j} W_ij v_i v_j`. `DistanceJastrow` ties couplings
//! by graph distance, which keeps the parameter count at the number of
//! distinct distances on the lattice.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use super::Machine;
use crate::graph::Graph;

/// Pairwise Jastrow with one free coupling per site pair.
#[derive(Clone, Debug)]
pub struct Jastrow {
    n_visible: usize,
    /// Symmetric coupling matrix with zero diagonal.
    w: DMatrix<Complex64>,
}

/// Lookup cache: theta_i = sum_j W_ij v_j.
#[derive(Clone, Debug)]
pub struct JastrowLookup {
    theta: DVector<Complex64>,
}

impl Default for JastrowLookup {
    fn default() -> Self {
        Self {
            theta: DVector::zeros(0),
        }
    }
}

impl Jastrow {
    pub fn new(n_visible: usize) -> Self {
        assert!(n_visible >= 2, "Jastrow needs at least two sites");
        Self {
            n_visible,
            w: DMatrix::zeros(n_visible, n_visible),
        }
    }

    /// Gaussian-random couplings, for starting an optimization away from the
    /// trivial point.
    pub fn init_random_pars(&mut self, rng: &mut StdRng, sigma: f64) {
        let normal = Normal::new(0.0, sigma).unwrap();
        let n = self.n_par();
        let mut p = DVector::zeros(n);
        for x in p.iter_mut() {
            *x = Complex64::new(normal.sample(rng), 0.0);
        }
        self.set_parameters(&p);
    }

    fn delta(values: &[f64], v: &DVector<f64>, sites: &[usize]) -> Vec<f64> {
        sites
            .iter()
            .zip(values.iter())
            .map(|(&s, &x)| x - v[s])
            .collect()
    }
}

impl Machine for Jastrow {
    type Lookup = JastrowLookup;

    fn n_visible(&self) -> usize {
        self.n_visible
    }

    fn n_par(&self) -> usize {
        self.n_visible * (self.n_visible - 1) / 2
    }

    fn log_val(&self, v: &DVector<f64>) -> Complex64 {
        let mut acc = Complex64::new(0.0, 0.0);
        for i in 0..self.n_visible {
            for j in (i + 1)..self.n_visible {
                acc += self.w[(i, j)] * v[i] * v[j];
            }
        }
        acc
    }

    fn init_lookup(&self, v: &DVector<f64>, lt: &mut Self::Lookup) {
        lt.theta = DVector::zeros(self.n_visible);
        for i in 0..self.n_visible {
            let mut t = Complex64::new(0.0, 0.0);
            for j in 0..self.n_visible {
                t += self.w[(i, j)] * v[j];
            }
            lt.theta[i] = t;
        }
    }

    fn update_lookup(
        &self,
        v: &DVector<f64>,
        sites: &[usize],
        values: &[f64],
        lt: &mut Self::Lookup,
    ) {
        let deltas = Self::delta(values, v, sites);
        for (&k, &dk) in sites.iter().zip(deltas.iter()) {
            for i in 0..self.n_visible {
                lt.theta[i] += self.w[(i, k)] * dk;
            }
        }
    }

    fn log_val_diff(
        &self,
        v: &DVector<f64>,
        sites: &[usize],
        values: &[f64],
        lt: &Self::Lookup,
    ) -> Complex64 {
        let deltas = Self::delta(values, v, sites);
        let mut diff = Complex64::new(0.0, 0.0);
        for (&k, &dk) in sites.iter().zip(deltas.iter()) {
            diff += lt.theta[k] * dk;
        }
        // Pairs where both endpoints change.
        for a in 0..sites.len() {
            for b in (a + 1)..sites.len() {
                diff += self.w[(sites[a], sites[b])] * deltas[a] * deltas[b];
            }
        }
        diff
    }

    fn der_log(&self, v: &DVector<f64>) -> DVector<Complex64> {
        let mut d = DVector::zeros(self.n_par());
        let mut k = 0;
        for i in 0..self.n_visible {
            for j in (i + 1)..self.n_visible {
                d[k] = Complex64::new(v[i] * v[j], 0.0);
                k += 1;
            }
        }
        d
    }

    fn parameters(&self) -> DVector<Complex64> {
        let mut p = DVector::zeros(self.n_par());
        let mut k = 0;
        for i in 0..self.n_visible {
            for j in (i + 1)..self.n_visible {
                p[k] = self.w[(i, j)];
                k += 1;
            }
        }
        p
    }

    fn set_parameters(&mut self, p: &DVector<Complex64>) {
        assert_eq!(p.len(), self.n_par(), "wrong parameter count");
        let mut k = 0;
        for i in 0..self.n_visible {
            for j in (i + 1)..self.n_visible {
                self.w[(i, j)] = p[k];
                self.w[(j, i)] = p[k];
                k += 1;
            }
        }
    }
}

/// Jastrow with couplings shared between all pairs at the same graph
/// distance. On a ring of four sites this is a two-parameter machine.
#[derive(Clone, Debug)]
pub struct DistanceJastrow {
    n_visible: usize,
    n_classes: usize,
    /// One coupling per distance class.
    params: DVector<Complex64>,
    /// (i, j, class) for every pair i < j at finite distance.
    pairs: Vec<(usize, usize, usize)>,
    /// class_of[i][j] = distance class of the pair, if finite.
    class_of: Vec<Vec<Option<usize>>>,
}

/// Lookup cache: t[(c, i)] = sum of v_j over sites j at class-c distance
/// from site i.
#[derive(Clone, Debug)]
pub struct DistanceJastrowLookup {
    t: DMatrix<f64>,
}

impl Default for DistanceJastrowLookup {
    fn default() -> Self {
        Self {
            t: DMatrix::zeros(0, 0),
        }
    }
}

impl DistanceJastrow {
    pub fn new(graph: &Graph) -> Self {
        let n = graph.n_sites();
        let dist = graph.all_distances();
        let mut classes: Vec<usize> = dist
            .iter()
            .flat_map(|row| row.iter().copied())
            .filter(|&d| d != 0 && d != usize::MAX)
            .collect();
        classes.sort_unstable();
        classes.dedup();
        let class_index = |d: usize| classes.iter().position(|&c| c == d);

        let mut pairs = Vec::new();
        let mut class_of = vec![vec![None; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    class_of[i][j] = class_index(dist[i][j]);
                }
            }
        }
        for i in 0..n {
            for j in (i + 1)..n {
                if let Some(c) = class_of[i][j] {
                    pairs.push((i, j, c));
                }
            }
        }
        Self {
            n_visible: n,
            n_classes: classes.len(),
            params: DVector::zeros(classes.len()),
            pairs,
            class_of,
        }
    }

    pub fn init_random_pars(&mut self, rng: &mut StdRng, sigma: f64) {
        let normal = Normal::new(0.0, sigma).unwrap();
        for x in self.params.iter_mut() {
            *x = Complex64::new(normal.sample(rng), 0.0);
        }
    }
}

impl Machine for DistanceJastrow {
    type Lookup = DistanceJastrowLookup;

    fn n_visible(&self) -> usize {
        self.n_visible
    }

    fn n_par(&self) -> usize {
        self.n_classes
    }

    fn log_val(&self, v: &DVector<f64>) -> Complex64 {
        let mut acc = Complex64::new(0.0, 0.0);
        for &(i, j, c) in &self.pairs {
            acc += self.params[c] * v[i] * v[j];
        }
        acc
    }

    fn init_lookup(&self, v: &DVector<f64>, lt: &mut Self::Lookup) {
        lt.t = DMatrix::zeros(self.n_classes, self.n_visible);
        for i in 0..self.n_visible {
            for j in 0..self.n_visible {
                if let Some(c) = self.class_of[i][j] {
                    lt.t[(c, i)] += v[j];
                }
            }
        }
    }

    fn update_lookup(
        &self,
        v: &DVector<f64>,
        sites: &[usize],
        values: &[f64],
        lt: &mut Self::Lookup,
    ) {
        for (&k, &x) in sites.iter().zip(values.iter()) {
            let dk = x - v[k];
            for i in 0..self.n_visible {
                if let Some(c) = self.class_of[i][k] {
                    lt.t[(c, i)] += dk;
                }
            }
        }
    }

    fn log_val_diff(
        &self,
        v: &DVector<f64>,
        sites: &[usize],
        values: &[f64],
        lt: &Self::Lookup,
    ) -> Complex64 {
        let mut diff = Complex64::new(0.0, 0.0);
        for (&k, &x) in sites.iter().zip(values.iter()) {
            let dk = x - v[k];
            for c in 0..self.n_classes {
                diff += self.params[c] * dk * lt.t[(c, k)];
            }
        }
        // Pairs where both endpoints change.
        for a in 0..sites.len() {
            for b in (a + 1)..sites.len() {
                if let Some(c) = self.class_of[sites[a]][sites[b]] {
                    let da = values[a] - v[sites[a]];
                    let db = values[b] - v[sites[b]];
                    diff += self.params[c] * da * db;
                }
            }
        }
        diff
    }

    fn der_log(&self, v: &DVector<f64>) -> DVector<Complex64> {
        let mut d = DVector::zeros(self.n_classes);
        for &(i, j, c) in &self.pairs {
            d[c] += Complex64::new(v[i] * v[j], 0.0);
        }
        d
    }

    fn parameters(&self) -> DVector<Complex64> {
        self.params.clone()
    }

    fn set_parameters(&mut self, p: &DVector<Complex64>) {
        assert_eq!(p.len(), self.n_classes, "wrong parameter count");
        self.params.copy_from(p);
    }
}
