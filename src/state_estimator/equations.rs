//! The predict/update recipe shared by the linear and extended filters.
//!
//! Buffers are sized once from the state and measurement dimensions and never
//! resized afterwards.

use crate::error::{FilterError, Result};
use crate::gaussian::GaussianState;
use crate::state_estimator::Innovation;
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone)]
pub(crate) struct Workspace {
    n: usize,
    m: usize,
    Ft: DMatrix<f64>,
    PFt: DMatrix<f64>,
    /// H·P (m×n)
    pub HP: DMatrix<f64>,
    /// P·Hᵗ (n×m)
    pub PHt: DMatrix<f64>,
    pub S: DMatrix<f64>,
    pub S_inv: DMatrix<f64>,
    pub K: DMatrix<f64>,
    pub y: DVector<f64>,
}

impl Workspace {
    pub fn new(n: usize, m: usize) -> Self {
        Workspace {
            n,
            m,
            Ft: DMatrix::zeros(n, n),
            PFt: DMatrix::zeros(n, n),
            HP: DMatrix::zeros(m, n),
            PHt: DMatrix::zeros(n, m),
            S: DMatrix::zeros(m, m),
            S_inv: DMatrix::zeros(m, m),
            K: DMatrix::zeros(n, m),
            y: DVector::zeros(m),
        }
    }

    /// x = x_pred, P = F·P·Fᵗ + Q
    pub fn propagate(
        &mut self,
        state: &mut GaussianState,
        x_pred: &DVector<f64>,
        F: &DMatrix<f64>,
        Q: &DMatrix<f64>,
    ) -> Result<()> {
        let n = self.n;
        check_square(n, F, "transition Jacobian")?;
        check_square(n, Q, "process noise")?;
        if x_pred.len() != n {
            return Err(FilterError::dimension(n, x_pred.len(), "predicted mean"));
        }
        if state.dim() != n {
            return Err(FilterError::dimension(n, state.dim(), "state"));
        }

        state.x.copy_from(x_pred);
        F.transpose_to(&mut self.Ft);
        self.PFt.gemm(1.0, &state.P, &self.Ft, 0.0);
        state.P.copy_from(Q);
        state.P.gemm(1.0, F, &self.PFt, 1.0);
        state.validate()
    }

    /// Fills `y`, `HP`, `PHt` and `S` for the measurement `z`.
    pub fn innovate(
        &mut self,
        state: &GaussianState,
        z: &DVector<f64>,
        z_pred: &DVector<f64>,
        H: &DMatrix<f64>,
        R: &DMatrix<f64>,
    ) -> Result<()> {
        let (n, m) = (self.n, self.m);
        if H.shape() != (m, n) {
            return Err(FilterError::dimension(m, H.nrows(), "measurement Jacobian"));
        }
        check_square(m, R, "measurement noise")?;
        if z_pred.len() != m {
            return Err(FilterError::dimension(m, z_pred.len(), "predicted measurement"));
        }
        if z.len() != m {
            return Err(FilterError::dimension(m, z.len(), "measurement"));
        }
        if state.dim() != n {
            return Err(FilterError::dimension(n, state.dim(), "state"));
        }

        self.y.copy_from(z);
        self.y -= z_pred;
        self.HP.gemm(1.0, H, &state.P, 0.0);
        // P is symmetric, so P·Hᵗ = (H·P)ᵗ
        self.HP.transpose_to(&mut self.PHt);
        self.S.copy_from(R);
        self.S.gemm(1.0, H, &self.PHt, 1.0);
        Ok(())
    }

    /// K = P·Hᵗ·S⁻¹, x += K·y, P -= K·(H·P). Requires [`Workspace::innovate`] first.
    pub fn correct(&mut self, state: &mut GaussianState) -> Result<()> {
        self.S_inv.copy_from(&self.S);
        if !self.S_inv.try_inverse_mut() {
            return Err(FilterError::singular("innovation covariance"));
        }
        self.K.gemm(1.0, &self.PHt, &self.S_inv, 0.0);
        state.x.gemv(1.0, &self.K, &self.y, 1.0);
        state.P.gemm(-1.0, &self.K, &self.HP, 1.0);
        state.validate()
    }

    pub fn innovation(&self) -> Innovation {
        Innovation {
            y: self.y.clone(),
            S: self.S.clone(),
        }
    }
}

pub(crate) fn check_square(n: usize, M: &DMatrix<f64>, context: &str) -> Result<()> {
    if M.nrows() != n {
        return Err(FilterError::dimension(n, M.nrows(), context));
    }
    if M.ncols() != n {
        return Err(FilterError::dimension(n, M.ncols(), context));
    }
    Ok(())
}
