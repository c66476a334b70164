//! Online statistics and multi-chain convergence diagnostics for Monte Carlo
//! estimators.
//!
//! A flat sequence of per-sample values is reshaped into `n_chains`
//! interleaved sub-sequences (sample `p` of chain `c` sits at index
//! `p * n_chains + c`). In-chain means and variances are accumulated with a
//! one-pass Welford update, then reduced across all worker processes with a
//! blocking sum all-reduce.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use serde::Serialize;

use crate::comm::{sum_scalar, Communicator};
use crate::error::{Result, VmcError};

/// Summary statistics for one named observable at one optimization step.
///
/// With a single global chain the error, variance, correlation and R fields
/// are NaN: inter-chain variance cannot be estimated.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Stats {
    pub mean: Complex64,
    pub error_of_mean: f64,
    pub variance: f64,
    /// Integrated autocorrelation time estimate, rounded to whole sweeps.
    pub correlation: f64,
    /// Gelman-Rubin-style split diagnostic.
    pub r_hat: f64,
}

/// One-pass mean/variance accumulator, component-wise over re and im.
///
/// Zero samples leave mean and variance NaN, one sample leaves the variance
/// NaN. The variance is normalized by `n`, not `n - 1`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MeanVarAccumulator {
    n: usize,
    mu_re: f64,
    mu_im: f64,
    m2_re: f64,
    m2_im: f64,
}

impl MeanVarAccumulator {
    pub fn push(&mut self, x: Complex64) {
        self.n += 1;
        let n = self.n as f64;

        let d_re = x.re - self.mu_re;
        self.mu_re += d_re / n;
        self.m2_re += d_re * (x.re - self.mu_re);

        let d_im = x.im - self.mu_im;
        self.mu_im += d_im / n;
        self.m2_im += d_im * (x.im - self.mu_im);
    }

    pub fn count(&self) -> usize {
        self.n
    }

    pub fn mean(&self) -> Complex64 {
        if self.n == 0 {
            Complex64::new(f64::NAN, f64::NAN)
        } else {
            Complex64::new(self.mu_re, self.mu_im)
        }
    }

    pub fn variance(&self) -> f64 {
        match self.n {
            0 | 1 => f64::NAN,
            n => (self.m2_re + self.m2_im) / n as f64,
        }
    }
}

/// In-chain means and variances for this process's chains.
fn statistics_local(values: &[Complex64], n_chains: usize) -> Result<(Vec<Complex64>, Vec<f64>)> {
    if n_chains == 0 {
        return Err(VmcError::InvalidInput(format!(
            "invalid number of chains: {n_chains}; expected a positive integer"
        )));
    }
    if values.len() % n_chains != 0 {
        return Err(VmcError::InvalidInput(format!(
            "invalid number of chains: {n_chains}; sequence length {} must be a multiple of it",
            values.len()
        )));
    }
    let mut accs = vec![MeanVarAccumulator::default(); n_chains];
    for (k, &x) in values.iter().enumerate() {
        accs[k % n_chains].push(x);
    }
    Ok((
        accs.iter().map(|a| a.mean()).collect(),
        accs.iter().map(|a| a.variance()).collect(),
    ))
}

/// Full multi-chain statistics with cross-process reduction.
pub fn statistics(
    values: &[Complex64],
    n_chains: usize,
    comm: &dyn Communicator,
) -> Result<Stats> {
    if values.len() < n_chains {
        return Err(VmcError::InvalidInput(
            "not enough samples to compute statistics".into(),
        ));
    }
    let (chain_means, chain_vars) = statistics_local(values, n_chains)?;

    // Samples per chain, and the global chain count over all processes.
    let n = values.len() / n_chains;
    let m = comm.size() * n_chains;

    let mut mean: Complex64 = chain_means.iter().sum();
    sum_scalar(comm, &mut mean);
    mean /= m as f64;

    let mut var = [
        chain_means.iter().map(|c| (c - mean).norm_sqr()).sum::<f64>(),
        chain_vars.iter().sum::<f64>(),
    ];
    comm.all_sum_f64(&mut var);

    if m == 1 {
        return Ok(Stats {
            mean,
            error_of_mean: f64::NAN,
            variance: f64::NAN,
            correlation: f64::NAN,
            r_hat: f64::NAN,
        });
    }

    let var_b = var[0] / m as f64;
    let var_w = var[1] / m as f64;

    if var_b.is_nan() || var_w.is_nan() {
        return Ok(Stats {
            mean,
            error_of_mean: f64::NAN,
            variance: f64::NAN,
            correlation: f64::NAN,
            r_hat: f64::NAN,
        });
    }

    // Identical chains make both B and W vanish; the diagnostics are then
    // zero rather than 0/0.
    let t = if var_b == 0.0 { 0.0 } else { var_b / var_w };
    let mut correlation = 0.5 * (t * n as f64 - 1.0);
    if correlation < 0.0 {
        correlation = 0.0;
    }
    let r_hat = ((n as f64 - 1.0) / n as f64 + t).sqrt();

    Ok(Stats {
        mean,
        error_of_mean: (var_b / m as f64).sqrt(),
        variance: var_w,
        correlation: correlation.round(),
        r_hat,
    })
}

/// Weighted mean and second moment for importance sampling. Weights are
/// non-negative and globally normalized by the caller; the multi-chain
/// diagnostics are not defined for weighted estimates.
pub fn weighted_statistics(
    values: &[Complex64],
    weights: &[f64],
    comm: &dyn Communicator,
) -> Result<Stats> {
    if values.len() != weights.len() {
        return Err(VmcError::InvalidInput(format!(
            "weighted statistics: {} values but {} weights",
            values.len(),
            weights.len()
        )));
    }
    if weights.iter().any(|&w| w < 0.0) {
        return Err(VmcError::InvalidInput(
            "weighted statistics: negative weight".into(),
        ));
    }

    let mut mean: Complex64 = values
        .iter()
        .zip(weights.iter())
        .map(|(&v, &w)| v * w)
        .sum();
    sum_scalar(comm, &mut mean);

    let mut second = [values
        .iter()
        .zip(weights.iter())
        .map(|(&v, &w)| v.norm_sqr() * w)
        .sum::<f64>()];
    comm.all_sum_f64(&mut second);
    let variance = second[0] - mean.norm_sqr();

    Ok(Stats {
        mean,
        error_of_mean: f64::NAN,
        variance,
        correlation: f64::NAN,
        r_hat: f64::NAN,
    })
}

/// Center the columns of a per-sample log-derivative matrix by the global
/// parameter-derivative mean.
pub fn subtract_mean(der_logs: &mut DMatrix<Complex64>, comm: &dyn Communicator) {
    let rows = der_logs.nrows();
    // A rank holding no rows still contributes zeros to the reduction.
    let inv = if rows == 0 {
        Complex64::new(0.0, 0.0)
    } else {
        Complex64::new(1.0 / rows as f64, 0.0)
    };
    let mut mean: Vec<Complex64> = (0..der_logs.ncols())
        .map(|c| der_logs.column(c).sum() * inv)
        .collect();
    comm.all_sum_c64(&mut mean);
    let scale = Complex64::new(1.0 / comm.size() as f64, 0.0);
    for (c, m) in mean.iter().enumerate() {
        let m = m * scale;
        for r in 0..rows {
            der_logs[(r, c)] -= m;
        }
    }
}

/// Sampled gradient `F = O^H (E - <E>) / N`, reduced over all processes.
/// Every process must supply the same number of rows.
pub fn gradient(
    values: &DVector<Complex64>,
    der_logs: &DMatrix<Complex64>,
    comm: &dyn Communicator,
) -> DVector<Complex64> {
    let rows = values.len();
    debug_assert_eq!(rows, der_logs.nrows());

    let mut mean = values.sum() / Complex64::new(rows as f64, 0.0);
    sum_scalar(comm, &mut mean);
    mean /= comm.size() as f64;

    let centered = values.map(|x| x - mean);
    let mut f = der_logs.adjoint() * centered * Complex64::new(1.0 / rows as f64, 0.0);
    comm.all_sum_c64(f.as_mut_slice());
    f *= Complex64::new(1.0 / comm.size() as f64, 0.0);
    f
}
