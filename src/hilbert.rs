//! Discrete configuration space: which local values each site may take.

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::Rng;

/// Configuration space with the same finite set of local values on every
/// site, e.g. `{-1, +1}` for spin-1/2.
#[derive(Clone, Debug)]
pub struct Hilbert {
    size: usize,
    local_states: Vec<f64>,
}

impl Hilbert {
    pub fn new(size: usize, local_states: Vec<f64>) -> Self {
        assert!(size > 0, "empty configuration space");
        assert!(
            local_states.len() >= 2,
            "need at least two local states per site"
        );
        Self { size, local_states }
    }

    /// Spin-1/2 space with local values -1 and +1.
    pub fn spin_half(size: usize) -> Self {
        Self::new(size, vec![-1.0, 1.0])
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn local_states(&self) -> &[f64] {
        &self.local_states
    }

    /// Overwrite `v` with a uniformly random valid configuration.
    pub fn random_vals(&self, v: &mut DVector<f64>, rng: &mut StdRng) {
        debug_assert_eq!(v.len(), self.size);
        for x in v.iter_mut() {
            *x = self.local_states[rng.gen_range(0..self.local_states.len())];
        }
    }

    /// Apply a local update in place.
    pub fn update_conf(&self, v: &mut DVector<f64>, sites: &[usize], values: &[f64]) {
        debug_assert_eq!(sites.len(), values.len());
        for (&s, &x) in sites.iter().zip(values.iter()) {
            v[s] = x;
        }
    }

    /// Whether every entry of `v` is an allowed local value.
    pub fn contains(&self, v: &DVector<f64>) -> bool {
        v.iter()
            .all(|x| self.local_states.iter().any(|s| (s - x).abs() < 1e-12))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn random_vals_are_valid() {
        let hi = Hilbert::spin_half(10);
        let mut rng = StdRng::seed_from_u64(7);
        let mut v = DVector::zeros(10);
        hi.random_vals(&mut v, &mut rng);
        assert!(hi.contains(&v));
    }

    #[test]
    fn update_conf_touches_only_given_sites() {
        let hi = Hilbert::spin_half(4);
        let mut v = DVector::from_element(4, 1.0);
        hi.update_conf(&mut v, &[1, 3], &[-1.0, -1.0]);
        assert_eq!(v.as_slice(), &[1.0, -1.0, 1.0, -1.0]);
    }
}
