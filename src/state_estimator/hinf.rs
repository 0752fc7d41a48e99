//! Discrete H-infinity filter.
//!
//! Prediction is the Kalman one. The update minimizes the worst-case
//! estimation error instead of its variance:
//!
//! ```text
//! S̄ = Lᵗ·S·L
//! D = P⁻¹ − θ·S̄ + Hᵗ·R⁻¹·H
//! P ← D⁻¹
//! K = D⁻¹·Hᵗ·R⁻¹
//! x ← x + K·(z − ẑ)
//! ```
//!
//! With θ = 0 and L = S = I this is exactly the Kalman update.

use super::equations::Workspace;
use super::models::{Predictor, Projector};
use super::{check_measurement_dim, check_state_dim, Innovation, StateEstimator};
use crate::error::{FilterError, Result};
use crate::gaussian::GaussianState;
use nalgebra::{DMatrix, DVector};
use tracing::trace;

/// Tuning of the H-infinity update.
#[derive(Debug, Clone, PartialEq)]
pub struct HInfinityConfig {
    /// Performance bound
    pub theta: f64,
    /// Maps the state onto the quantities whose error is bounded (p×n)
    pub L: DMatrix<f64>,
    /// Weights the bounded quantities (p×p)
    pub S: DMatrix<f64>,
}

impl HInfinityConfig {
    /// L = S = I over the whole state.
    pub fn identity(n: usize, theta: f64) -> Self {
        HInfinityConfig {
            theta,
            L: DMatrix::identity(n, n),
            S: DMatrix::identity(n, n),
        }
    }

    fn validate(&self, n: usize) -> Result<()> {
        if !(self.theta.is_finite() && self.theta >= 0.0) {
            return Err(FilterError::configuration(format!(
                "performance bound must be finite and non-negative, got {}",
                self.theta
            )));
        }
        if self.L.ncols() != n {
            return Err(FilterError::dimension(n, self.L.ncols(), "H-infinity L columns"));
        }
        let p = self.L.nrows();
        if self.S.shape() != (p, p) {
            return Err(FilterError::dimension(p, self.S.nrows(), "H-infinity weighting S"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DiscreteHInfinityFilter<P, M> {
    predictor: P,
    projector: M,
    theta: f64,
    S_bar: DMatrix<f64>,
    workspace: Workspace,
    P_inv: DMatrix<f64>,
    R_inv: DMatrix<f64>,
    HtR_inv: DMatrix<f64>,
    D: DMatrix<f64>,
    K: DMatrix<f64>,
}

impl<P, M> DiscreteHInfinityFilter<P, M>
where
    P: Predictor,
    M: Projector,
{
    pub fn new(predictor: P, projector: M, config: HInfinityConfig) -> Result<Self> {
        let n = predictor.state_dim();
        if projector.state_dim() != n {
            return Err(FilterError::dimension(
                n,
                projector.state_dim(),
                "projector state dimension",
            ));
        }
        config.validate(n)?;
        let m = projector.measurement_dim();
        let S_bar = config.L.transpose() * &config.S * &config.L;

        Ok(DiscreteHInfinityFilter {
            predictor,
            projector,
            theta: config.theta,
            S_bar,
            workspace: Workspace::new(n, m),
            P_inv: DMatrix::zeros(n, n),
            R_inv: DMatrix::zeros(m, m),
            HtR_inv: DMatrix::zeros(n, m),
            D: DMatrix::zeros(n, n),
            K: DMatrix::zeros(n, m),
        })
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// Lᵗ·S·L
    pub fn weighting(&self) -> &DMatrix<f64> {
        &self.S_bar
    }
}

impl<P, M> StateEstimator for DiscreteHInfinityFilter<P, M>
where
    P: Predictor,
    M: Projector,
{
    fn state_dim(&self) -> usize {
        self.predictor.state_dim()
    }

    fn measurement_dim(&self) -> usize {
        self.projector.measurement_dim()
    }

    fn predict(&mut self, state: &mut GaussianState, u: Option<&DVector<f64>>) -> Result<()> {
        check_state_dim(self.state_dim(), state)?;
        let prediction = self.predictor.compute(&state.x, u)?;
        self.workspace
            .propagate(state, &prediction.x, &prediction.F, &prediction.Q)?;
        trace!(trace_P = state.P.trace(), "h-infinity predict");
        Ok(())
    }

    fn update(&mut self, state: &mut GaussianState, z: &DVector<f64>) -> Result<Innovation> {
        check_state_dim(self.state_dim(), state)?;
        check_measurement_dim(self.measurement_dim(), z)?;
        let projection = self.projector.compute(&state.x)?;
        self.workspace
            .innovate(state, z, &projection.z, &projection.H, &projection.R)?;

        self.R_inv.copy_from(&projection.R);
        if !self.R_inv.try_inverse_mut() {
            return Err(FilterError::singular("measurement noise"));
        }
        self.P_inv.copy_from(&state.P);
        if !self.P_inv.try_inverse_mut() {
            return Err(FilterError::singular("state covariance"));
        }
        projection.H.tr_mul_to(&self.R_inv, &mut self.HtR_inv);

        self.D.copy_from(&self.P_inv);
        let theta = self.theta;
        self.D.zip_apply(&self.S_bar, |d, s| *d -= theta * s);
        self.D.gemm(1.0, &self.HtR_inv, &projection.H, 1.0);

        let D_chol = self.D.clone().cholesky().ok_or_else(|| {
            FilterError::NotPositiveSemiDefinite {
                context: format!(
                    "H-infinity matrix D is not positive definite for theta = {}",
                    theta
                ),
            }
        })?;
        let P_new = D_chol.inverse();
        self.K.gemm(1.0, &P_new, &self.HtR_inv, 0.0);

        state.x.gemv(1.0, &self.K, &self.workspace.y, 1.0);
        state.P.copy_from(&P_new);
        state.validate()?;
        trace!(trace_P = state.P.trace(), theta = self.theta, "h-infinity update");
        Ok(self.workspace.innovation())
    }

    fn innovation(&mut self, state: &GaussianState, z: &DVector<f64>) -> Result<Innovation> {
        check_state_dim(self.state_dim(), state)?;
        check_measurement_dim(self.measurement_dim(), z)?;
        let projection = self.projector.compute(&state.x)?;
        self.workspace
            .innovate(state, z, &projection.z, &projection.H, &projection.R)?;
        Ok(self.workspace.innovation())
    }
}
