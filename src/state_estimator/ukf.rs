//! Unscented Kalman filter.
//!
//! Each of the two stages either runs the unscented transform or falls back
//! to the extended Kalman equations, fixed at construction.

use super::equations::Workspace;
use super::models::{Predictor, Projector};
use super::{check_measurement_dim, check_state_dim, Innovation, StateEstimator};
use crate::error::{FilterError, Result};
use crate::gaussian::GaussianState;
use nalgebra::{DMatrix, DVector};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UkfConfig {
    /// Spread of the sigma points; n + kappa must be positive
    pub kappa: f64,
    pub unscented_predict: bool,
    pub unscented_update: bool,
}

impl Default for UkfConfig {
    fn default() -> Self {
        UkfConfig {
            kappa: 0.0,
            unscented_predict: true,
            unscented_update: true,
        }
    }
}

/// The 2n+1 sigma points of a state, one per column, with their weights.
#[derive(Debug, Clone)]
pub struct SigmaPoints {
    kappa: f64,
    pub points: DMatrix<f64>,
    pub weights_mean: DVector<f64>,
    /// Equal to the mean weights, except that the centre point gets zero
    /// weight when kappa <= 0.
    pub weights_covariance: DVector<f64>,
}

impl SigmaPoints {
    pub fn new(n: usize, kappa: f64) -> Result<Self> {
        let c = n as f64 + kappa;
        if !(c > 0.0 && kappa.is_finite()) {
            return Err(FilterError::configuration(format!(
                "n + kappa must be positive, got n = {}, kappa = {}",
                n, kappa
            )));
        }
        let n_points = 2 * n + 1;
        let mut weights_mean = DVector::from_element(n_points, 0.5 / c);
        weights_mean[0] = kappa / c;

        let mut weights_covariance = weights_mean.clone();
        if kappa <= 0.0 {
            weights_covariance[0] = 0.0;
        }

        Ok(SigmaPoints {
            kappa,
            points: DMatrix::zeros(n, n_points),
            weights_mean,
            weights_covariance,
        })
    }

    pub fn dim(&self) -> usize {
        self.points.nrows()
    }

    pub fn len(&self) -> usize {
        self.points.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mean, then mean ± the columns of the Cholesky factor of (n + κ)·P.
    pub fn generate(&mut self, state: &GaussianState) -> Result<()> {
        let n = self.dim();
        check_state_dim(n, state)?;
        let scaled = &state.P * (n as f64 + self.kappa);
        let L = scaled
            .cholesky()
            .ok_or_else(|| FilterError::NotPositiveSemiDefinite {
                context: "covariance of sigma points is not positive definite".to_string(),
            })?
            .unpack();

        self.points.column_mut(0).copy_from(&state.x);
        for i in 0..n {
            let offset = L.column(i);
            let mut plus = self.points.column_mut(i + 1);
            plus.copy_from(&state.x);
            plus += &offset;
            let mut minus = self.points.column_mut(n + i + 1);
            minus.copy_from(&state.x);
            minus -= &offset;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UnscentedKalmanFilter<P, M> {
    predictor: P,
    projector: M,
    config: UkfConfig,
    sigma: SigmaPoints,
    point: DVector<f64>,
    propagated: DMatrix<f64>,
    measured: DMatrix<f64>,
    x_mean: DVector<f64>,
    z_mean: DVector<f64>,
    dx: DVector<f64>,
    dz: DVector<f64>,
    Pxz: DMatrix<f64>,
    Pxz_t: DMatrix<f64>,
    workspace: Workspace,
}

impl<P, M> UnscentedKalmanFilter<P, M>
where
    P: Predictor,
    M: Projector,
{
    pub fn new(predictor: P, projector: M, config: UkfConfig) -> Result<Self> {
        let n = predictor.state_dim();
        if projector.state_dim() != n {
            return Err(FilterError::dimension(
                n,
                projector.state_dim(),
                "projector state dimension",
            ));
        }
        if !(config.unscented_predict || config.unscented_update) {
            return Err(FilterError::configuration(
                "at least one of predict and update must be unscented",
            ));
        }
        let m = projector.measurement_dim();
        let sigma = SigmaPoints::new(n, config.kappa)?;
        let n_points = sigma.len();

        Ok(UnscentedKalmanFilter {
            predictor,
            projector,
            config,
            sigma,
            point: DVector::zeros(n),
            propagated: DMatrix::zeros(n, n_points),
            measured: DMatrix::zeros(m, n_points),
            x_mean: DVector::zeros(n),
            z_mean: DVector::zeros(m),
            dx: DVector::zeros(n),
            dz: DVector::zeros(m),
            Pxz: DMatrix::zeros(n, m),
            Pxz_t: DMatrix::zeros(m, n),
            workspace: Workspace::new(n, m),
        })
    }

    pub fn config(&self) -> &UkfConfig {
        &self.config
    }

    fn unscented_predict(
        &mut self,
        state: &mut GaussianState,
        u: Option<&DVector<f64>>,
    ) -> Result<()> {
        self.sigma.generate(state)?;
        for i in 0..self.sigma.len() {
            self.point.copy_from(&self.sigma.points.column(i));
            let prediction = self.predictor.compute(&self.point, u)?;
            self.propagated.column_mut(i).copy_from(&prediction.x);
        }
        self.propagated
            .mul_to(&self.sigma.weights_mean, &mut self.x_mean);

        // Process noise is taken at the prior mean
        let Q = &self.predictor.compute(&state.x, u)?.Q;
        state.P.copy_from(Q);
        for (i, w) in self.sigma.weights_covariance.iter().enumerate() {
            self.dx.copy_from(&self.propagated.column(i));
            self.dx -= &self.x_mean;
            state.P.ger(*w, &self.dx, &self.dx, 1.0);
        }
        state.x.copy_from(&self.x_mean);
        state.validate()
    }

    fn extended_predict(&mut self, state: &mut GaussianState, u: Option<&DVector<f64>>) -> Result<()> {
        let prediction = self.predictor.compute(&state.x, u)?;
        self.workspace
            .propagate(state, &prediction.x, &prediction.F, &prediction.Q)
    }

    /// Fills the workspace `y` and `S`, and `Pxz` when unscented.
    fn innovate(&mut self, state: &GaussianState, z: &DVector<f64>) -> Result<()> {
        check_state_dim(self.state_dim(), state)?;
        check_measurement_dim(self.measurement_dim(), z)?;
        if !self.config.unscented_update {
            let projection = self.projector.compute(&state.x)?;
            return self
                .workspace
                .innovate(state, z, &projection.z, &projection.H, &projection.R);
        }

        self.sigma.generate(state)?;
        for i in 0..self.sigma.len() {
            self.point.copy_from(&self.sigma.points.column(i));
            let projection = self.projector.compute(&self.point)?;
            self.measured.column_mut(i).copy_from(&projection.z);
        }
        self.measured
            .mul_to(&self.sigma.weights_mean, &mut self.z_mean);

        let R = &self.projector.compute(&state.x)?.R;
        let S = &mut self.workspace.S;
        S.copy_from(R);
        self.Pxz.fill(0.0);
        for (i, w) in self.sigma.weights_covariance.iter().enumerate() {
            self.dz.copy_from(&self.measured.column(i));
            self.dz -= &self.z_mean;
            self.dx.copy_from(&self.sigma.points.column(i));
            self.dx -= &state.x;
            S.ger(*w, &self.dz, &self.dz, 1.0);
            self.Pxz.ger(*w, &self.dx, &self.dz, 1.0);
        }
        self.workspace.y.copy_from(z);
        self.workspace.y -= &self.z_mean;
        Ok(())
    }

    /// K = Pxz·Pz⁻¹, x += K·y, P -= K·Pz·Kᵗ (= K·Pxzᵗ)
    fn unscented_correct(&mut self, state: &mut GaussianState) -> Result<()> {
        let ws = &mut self.workspace;
        ws.S_inv.copy_from(&ws.S);
        if !ws.S_inv.try_inverse_mut() {
            return Err(FilterError::singular("innovation covariance"));
        }
        ws.K.gemm(1.0, &self.Pxz, &ws.S_inv, 0.0);
        state.x.gemv(1.0, &ws.K, &ws.y, 1.0);
        self.Pxz.transpose_to(&mut self.Pxz_t);
        state.P.gemm(-1.0, &ws.K, &self.Pxz_t, 1.0);
        state.validate()
    }
}

impl<P, M> StateEstimator for UnscentedKalmanFilter<P, M>
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
        if self.config.unscented_predict {
            self.unscented_predict(state, u)?;
        } else {
            self.extended_predict(state, u)?;
        }
        trace!(
            trace_P = state.P.trace(),
            unscented = self.config.unscented_predict,
            "ukf predict"
        );
        Ok(())
    }

    fn update(&mut self, state: &mut GaussianState, z: &DVector<f64>) -> Result<Innovation> {
        self.innovate(state, z)?;
        if self.config.unscented_update {
            self.unscented_correct(state)?;
        } else {
            self.workspace.correct(state)?;
        }
        trace!(
            trace_P = state.P.trace(),
            unscented = self.config.unscented_update,
            "ukf update"
        );
        Ok(self.workspace.innovation())
    }

    fn innovation(&mut self, state: &GaussianState, z: &DVector<f64>) -> Result<Innovation> {
        self.innovate(state, z)?;
        Ok(self.workspace.innovation())
    }
}
