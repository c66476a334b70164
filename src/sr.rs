//! Stochastic reconfiguration: the natural-gradient linear solve.
//!
//! Given the centered log-derivative matrix `O` (rows = samples, columns =
//! parameters) and the sampled gradient `F`, produce the update `delta`
//! solving `(S + lambda I) delta = F` with `S = O^H O / N` summed over all
//! worker processes. `S` is Hermitian positive-semidefinite and frequently
//! near-singular, so the diagonal shift is part of the method, not a
//! numerical convenience.
//!
//! Both solve strategies require that `F` is identical on every rank (the
//! gradient reduction guarantees this); the iterative path then takes the
//! same number of CG steps everywhere and its per-iteration all-reduces
//! stay matched.

use nalgebra::{Cholesky, DMatrix, DVector};
use num_complex::Complex64;
use tracing::warn;

use crate::comm::Communicator;
use crate::error::{Result, VmcError};

/// Direct factorization used when the S matrix is materialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LsqSolver {
    /// Symmetric positive-definite Cholesky factorization.
    Llt,
    /// Rank-revealing column-pivoted QR, for near-singular S.
    ColPivQr,
}

/// Solver configuration plus the knobs applied after the solve.
#[derive(Clone, Copy, Debug)]
pub struct Sr {
    diag_shift: f64,
    rescale_shift: bool,
    use_iterative: bool,
    solver: LsqSolver,
    cg_tol: f64,
}

impl Sr {
    pub fn new(solver: LsqSolver, diag_shift: f64, use_iterative: bool, rescale_shift: bool) -> Self {
        Self {
            diag_shift,
            rescale_shift,
            use_iterative,
            solver,
            cg_tol: 1e-3,
        }
    }

    pub fn diag_shift(&self) -> f64 {
        self.diag_shift
    }

    pub fn is_iterative(&self) -> bool {
        self.use_iterative
    }

    /// Solve for the natural-gradient update from this step's sample batch.
    /// `der_logs` must already be centered by the global mean, and every
    /// rank must hold the same number of rows.
    pub fn compute_update(
        &self,
        der_logs: &DMatrix<Complex64>,
        grad: &DVector<Complex64>,
        comm: &dyn Communicator,
    ) -> Result<DVector<Complex64>> {
        if der_logs.nrows() == 0 {
            return Err(VmcError::InvalidInput(
                "SR update requires at least one sample".into(),
            ));
        }
        if der_logs.ncols() != grad.len() {
            return Err(VmcError::InvalidInput(format!(
                "SR shape mismatch: {} parameters in O, {} in F",
                der_logs.ncols(),
                grad.len()
            )));
        }

        let scale = 1.0 / (der_logs.nrows() as f64 * comm.size() as f64);
        let shift = Complex64::new(self.diag_shift, 0.0);

        if self.use_iterative {
            let matvec = |x: &DVector<Complex64>| -> DVector<Complex64> {
                let ox = der_logs * x;
                let mut sx = der_logs.adjoint() * ox * Complex64::new(scale, 0.0);
                comm.all_sum_c64(sx.as_mut_slice());
                sx + x * shift
            };
            let delta = self.conjugate_gradient(grad, &matvec);
            Ok(self.maybe_rescale(delta, &matvec))
        } else {
            let mut s = der_logs.adjoint() * der_logs;
            comm.all_sum_c64(s.as_mut_slice());
            s *= Complex64::new(scale, 0.0);
            for i in 0..s.nrows() {
                s[(i, i)] += shift;
            }

            let delta = match self.solver {
                LsqSolver::Llt => Cholesky::new(s.clone())
                    .ok_or_else(|| {
                        VmcError::SolverFailure(
                            "Cholesky factorization of the shifted S matrix failed".into(),
                        )
                    })?
                    .solve(grad),
                LsqSolver::ColPivQr => s.clone().col_piv_qr().solve(grad).ok_or_else(|| {
                    VmcError::SolverFailure("column-pivoted QR solve failed".into())
                })?,
            };
            let matvec = |x: &DVector<Complex64>| &s * x;
            Ok(self.maybe_rescale(delta, &matvec))
        }
    }

    /// Rescale so the S-norm of the update is one, guarding against
    /// destructively large steps along flat directions.
    fn maybe_rescale<F>(&self, delta: DVector<Complex64>, matvec: &F) -> DVector<Complex64>
    where
        F: Fn(&DVector<Complex64>) -> DVector<Complex64>,
    {
        if !self.rescale_shift {
            return delta;
        }
        let s_delta = matvec(&delta);
        let nor = delta.dotc(&s_delta).re;
        if nor > 0.0 {
            delta / Complex64::new(nor.sqrt(), 0.0)
        } else {
            delta
        }
    }

    /// Matrix-free conjugate gradient for the Hermitian positive-definite
    /// shifted S operator, starting from zero.
    fn conjugate_gradient<F>(&self, b: &DVector<Complex64>, matvec: &F) -> DVector<Complex64>
    where
        F: Fn(&DVector<Complex64>) -> DVector<Complex64>,
    {
        let n = b.len();
        let mut x: DVector<Complex64> = DVector::zeros(n);
        let b_norm = b.norm();
        if b_norm == 0.0 {
            return x;
        }

        let mut r = b.clone();
        let mut p = r.clone();
        let mut rs_old = r.dotc(&r).re;
        let max_iter = 2 * n.max(8);

        for _ in 0..max_iter {
            if rs_old.sqrt() <= self.cg_tol * b_norm {
                return x;
            }
            let ap = matvec(&p);
            let denom = p.dotc(&ap).re;
            if denom <= 0.0 {
                // Operator lost positive-definiteness numerically.
                break;
            }
            let alpha = rs_old / denom;
            x += &p * Complex64::new(alpha, 0.0);
            r -= ap * Complex64::new(alpha, 0.0);
            let rs_new = r.dotc(&r).re;
            p = &r + &p * Complex64::new(rs_new / rs_old, 0.0);
            rs_old = rs_new;
        }
        if rs_old.sqrt() > self.cg_tol * b_norm {
            warn!(
                residual = rs_old.sqrt() / b_norm,
                "SR conjugate gradient stopped before reaching tolerance"
            );
        }
        x
    }
}
