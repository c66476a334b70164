//! Parameterized wavefunctions ("machines") and their evaluation contract.

mod jastrow;

pub use jastrow::{DistanceJastrow, Jastrow};

use nalgebra::DVector;
use num_complex::Complex64;

/// Evaluation contract consumed by the sampler and the natural-gradient
/// solver. Machines expose log-amplitudes, incremental log-amplitude
/// differences against a per-chain lookup cache, and log-derivatives with
/// respect to their variational parameters.
pub trait Machine {
    /// Mutable lookup cache owned by a chain and rebuilt on reset or after a
    /// parameter update.
    type Lookup: Clone + Default;

    fn n_visible(&self) -> usize;

    fn n_par(&self) -> usize;

    /// Logarithm of the wavefunction amplitude at `v`.
    fn log_val(&self, v: &DVector<f64>) -> Complex64;

    /// Rebuild the lookup cache for configuration `v`.
    fn init_lookup(&self, v: &DVector<f64>, lt: &mut Self::Lookup);

    /// Incrementally update the cache after the sites in `sites` take the
    /// values in `values`. Must be called before `v` itself is mutated.
    fn update_lookup(&self, v: &DVector<f64>, sites: &[usize], values: &[f64], lt: &mut Self::Lookup);

    /// `log psi(v') - log psi(v)` for the local change described by
    /// `sites`/`values`, computed incrementally from the cache. Cost is
    /// proportional to the size of the change, never to the system size.
    fn log_val_diff(
        &self,
        v: &DVector<f64>,
        sites: &[usize],
        values: &[f64],
        lt: &Self::Lookup,
    ) -> Complex64;

    /// Cache-free log-amplitude difference, used when evaluating connected
    /// configurations of an operator.
    fn log_val_diff_full(&self, v: &DVector<f64>, sites: &[usize], values: &[f64]) -> Complex64 {
        if sites.is_empty() {
            return Complex64::new(0.0, 0.0);
        }
        let mut vp = v.clone();
        for (&s, &x) in sites.iter().zip(values.iter()) {
            vp[s] = x;
        }
        self.log_val(&vp) - self.log_val(v)
    }

    /// Log-derivative vector `O_k(v) = d log psi / d p_k`.
    fn der_log(&self, v: &DVector<f64>) -> DVector<Complex64>;

    fn parameters(&self) -> DVector<Complex64>;

    fn set_parameters(&mut self, p: &DVector<Complex64>);
}
