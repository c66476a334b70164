//! Parameter update rules applied to the solved (natural) gradient.

use nalgebra::DVector;
use num_complex::Complex64;

pub trait Optimizer {
    /// Allocate internal state for `n_par` parameters.
    fn init(&mut self, n_par: usize);

    /// Clear momentum/decay state at the start of a run.
    fn reset(&mut self);

    /// Apply one update `pars <- pars - step(delta)` in place.
    fn update(&mut self, delta: &DVector<Complex64>, pars: &mut DVector<Complex64>);
}

/// Plain stochastic gradient descent with optional L2 regularization and
/// multiplicative learning-rate decay.
#[derive(Clone, Debug)]
pub struct Sgd {
    learning_rate: f64,
    l2_reg: f64,
    decay_factor: f64,
    eta: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            l2_reg: 0.0,
            decay_factor: 1.0,
            eta: learning_rate,
        }
    }

    pub fn with_l2_reg(mut self, l2_reg: f64) -> Self {
        self.l2_reg = l2_reg;
        self
    }

    pub fn with_decay_factor(mut self, decay_factor: f64) -> Self {
        self.decay_factor = decay_factor;
        self
    }
}

impl Optimizer for Sgd {
    fn init(&mut self, _n_par: usize) {}

    fn reset(&mut self) {
        self.eta = self.learning_rate;
    }

    fn update(&mut self, delta: &DVector<Complex64>, pars: &mut DVector<Complex64>) {
        let eta = Complex64::new(self.eta, 0.0);
        let l2 = Complex64::new(self.l2_reg, 0.0);
        for (p, d) in pars.iter_mut().zip(delta.iter()) {
            *p -= eta * (d + l2 * *p);
        }
        self.eta *= self.decay_factor;
    }
}

/// Heavy-ball momentum: `v <- beta v + delta`, `pars <- pars - eta v`.
#[derive(Clone, Debug)]
pub struct Momentum {
    learning_rate: f64,
    beta: f64,
    velocity: DVector<Complex64>,
}

impl Momentum {
    pub fn new(learning_rate: f64, beta: f64) -> Self {
        Self {
            learning_rate,
            beta,
            velocity: DVector::zeros(0),
        }
    }
}

impl Optimizer for Momentum {
    fn init(&mut self, n_par: usize) {
        self.velocity = DVector::zeros(n_par);
    }

    fn reset(&mut self) {
        self.velocity.fill(Complex64::new(0.0, 0.0));
    }

    fn update(&mut self, delta: &DVector<Complex64>, pars: &mut DVector<Complex64>) {
        debug_assert_eq!(self.velocity.len(), delta.len(), "call init() first");
        let beta = Complex64::new(self.beta, 0.0);
        let eta = Complex64::new(self.learning_rate, 0.0);
        for ((v, d), p) in self
            .velocity
            .iter_mut()
            .zip(delta.iter())
            .zip(pars.iter_mut())
        {
            *v = beta * *v + d;
            *p -= eta * *v;
        }
    }
}
