//! Quantum operators as "find connected configurations" black boxes, and the
//! local estimators built on top of them.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::graph::Graph;
use crate::hilbert::Hilbert;
use crate::machine::Machine;

/// Configurations connected to `v` by a nonzero matrix element. Entry `i`
/// describes `<v'_i|H|v>` where `v'_i` differs from `v` on `sites[i]`,
/// which take `values[i]`. An empty change list denotes the diagonal entry.
#[derive(Clone, Debug, Default)]
pub struct Connections {
    pub mels: Vec<Complex64>,
    pub sites: Vec<Vec<usize>>,
    pub values: Vec<Vec<f64>>,
}

impl Connections {
    pub fn len(&self) -> usize {
        self.mels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mels.is_empty()
    }

    fn push(&mut self, mel: Complex64, sites: Vec<usize>, values: Vec<f64>) {
        self.mels.push(mel);
        self.sites.push(sites);
        self.values.push(values);
    }
}

pub trait Operator {
    fn find_conn(&self, v: &DVector<f64>) -> Connections;

    fn hilbert(&self) -> &Hilbert;
}

/// Transverse-field Ising model on a graph:
/// `H = -J sum_<ij> s^z_i s^z_j - h sum_i s^x_i`.
#[derive(Clone, Debug)]
pub struct TransverseFieldIsing {
    hilbert: Hilbert,
    edges: Vec<(usize, usize)>,
    h: f64,
    j: f64,
}

impl TransverseFieldIsing {
    pub fn new(graph: &Graph, h: f64, j: f64) -> Self {
        Self {
            hilbert: Hilbert::spin_half(graph.n_sites()),
            edges: graph.edges().to_vec(),
            h,
            j,
        }
    }
}

impl Operator for TransverseFieldIsing {
    fn find_conn(&self, v: &DVector<f64>) -> Connections {
        let mut conn = Connections::default();

        let diag: f64 = self.edges.iter().map(|&(i, j)| v[i] * v[j]).sum();
        conn.push(Complex64::new(-self.j * diag, 0.0), Vec::new(), Vec::new());

        for i in 0..v.len() {
            conn.push(Complex64::new(-self.h, 0.0), vec![i], vec![-v[i]]);
        }
        conn
    }

    fn hilbert(&self) -> &Hilbert {
        &self.hilbert
    }
}

/// Local estimator `O_loc(v) = sum_i mel_i exp(log psi(v'_i) - log psi(v))`.
pub fn local_value<M: Machine, O: Operator + ?Sized>(
    op: &O,
    psi: &M,
    v: &DVector<f64>,
) -> Complex64 {
    let conn = op.find_conn(v);
    let mut acc = Complex64::new(0.0, 0.0);
    for i in 0..conn.len() {
        let diff = psi.log_val_diff_full(v, &conn.sites[i], &conn.values[i]);
        acc += conn.mels[i] * diff.exp();
    }
    acc
}

/// Local estimators for every row of a sample batch.
pub fn local_values<M: Machine, O: Operator + ?Sized>(
    op: &O,
    psi: &M,
    samples: &DMatrix<f64>,
) -> DVector<Complex64> {
    let mut out = DVector::zeros(samples.nrows());
    for k in 0..samples.nrows() {
        let v: DVector<f64> = samples.row(k).transpose();
        out[k] = local_value(op, psi, &v);
    }
    out
}

/// Parameter derivative of the local estimator,
/// `d O_loc / d p_k = sum_i mel_i exp(diff_i) (O_k(v'_i) - O_k(v))`.
/// Used by the variance optimization target.
pub fn local_value_deriv<M: Machine, O: Operator + ?Sized>(
    op: &O,
    psi: &M,
    v: &DVector<f64>,
) -> DVector<Complex64> {
    let conn = op.find_conn(v);
    let der = psi.der_log(v);
    let mut grad: DVector<Complex64> = DVector::zeros(psi.n_par());
    for i in 0..conn.len() {
        if conn.sites[i].is_empty() {
            continue;
        }
        let diff = psi.log_val_diff_full(v, &conn.sites[i], &conn.values[i]);
        let mut vp = v.clone();
        for (&s, &x) in conn.sites[i].iter().zip(conn.values[i].iter()) {
            vp[s] = x;
        }
        let der_p = psi.der_log(&vp);
        grad += (der_p - &der) * (conn.mels[i] * diff.exp());
    }
    grad
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    use crate::machine::DistanceJastrow;

    #[test]
    fn ising_connections_enumerate_diagonal_plus_flips() {
        let graph = Graph::ring(4);
        let ham = TransverseFieldIsing::new(&graph, 1.0, 1.0);
        let v = DVector::from_element(4, 1.0);
        let conn = ham.find_conn(&v);
        assert_eq!(conn.len(), 5);
        assert!(conn.sites[0].is_empty());
        assert_relative_eq!(conn.mels[0].re, -4.0);
        assert_eq!(conn.sites[1], vec![0]);
        assert_eq!(conn.values[1], vec![-1.0]);
    }

    #[test]
    fn local_value_at_trivial_machine_sums_matrix_elements() {
        let graph = Graph::ring(4);
        let ham = TransverseFieldIsing::new(&graph, 0.5, 1.0);
        // All couplings zero: every amplitude ratio is one.
        let psi = DistanceJastrow::new(&graph);
        let v = DVector::from_element(4, 1.0);
        let eloc = local_value(&ham, &psi, &v);
        assert_relative_eq!(eloc.re, -4.0 - 4.0 * 0.5, epsilon = 1e-12);
        assert_relative_eq!(eloc.im, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn local_value_deriv_matches_finite_differences() {
        let graph = Graph::ring(4);
        let ham = TransverseFieldIsing::new(&graph, 1.0, 1.0);
        let mut psi = DistanceJastrow::new(&graph);
        let mut pars = psi.parameters();
        pars[0] = Complex64::new(0.2, 0.0);
        pars[1] = Complex64::new(-0.1, 0.0);
        psi.set_parameters(&pars);

        let v = DVector::from_vec(vec![1.0, -1.0, 1.0, 1.0]);
        let grad = local_value_deriv(&ham, &psi, &v);

        let eps = 1e-6;
        for k in 0..psi.n_par() {
            let mut p = psi.parameters();
            p[k] += Complex64::new(eps, 0.0);
            psi.set_parameters(&p);
            let plus = local_value(&ham, &psi, &v);
            p[k] -= Complex64::new(2.0 * eps, 0.0);
            psi.set_parameters(&p);
            let minus = local_value(&ham, &psi, &v);
            p[k] += Complex64::new(eps, 0.0);
            psi.set_parameters(&p);

            let num = (plus - minus) / (2.0 * eps);
            assert_relative_eq!(grad[k].re, num.re, epsilon = 1e-4);
        }
    }
}
