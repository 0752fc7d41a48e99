use super::equations::Workspace;
use super::models::{Predictor, Projector};
use super::{check_measurement_dim, check_state_dim, Innovation, StateEstimator};
use crate::error::{FilterError, Result};
use crate::gaussian::GaussianState;
use nalgebra::DVector;
use tracing::trace;

/// Extended Kalman filter.
///
/// Same recipe as [`KalmanFilter`](super::kalman::KalmanFilter), with the
/// Jacobians and noise recomputed from the current estimate on every call.
#[derive(Debug, Clone)]
pub struct ExtendedKalmanFilter<P, M> {
    predictor: P,
    projector: M,
    workspace: Workspace,
}

impl<P, M> ExtendedKalmanFilter<P, M>
where
    P: Predictor,
    M: Projector,
{
    pub fn new(predictor: P, projector: M) -> Result<Self> {
        let n = predictor.state_dim();
        if projector.state_dim() != n {
            return Err(FilterError::dimension(
                n,
                projector.state_dim(),
                "projector state dimension",
            ));
        }
        let m = projector.measurement_dim();
        Ok(ExtendedKalmanFilter {
            predictor,
            projector,
            workspace: Workspace::new(n, m),
        })
    }

    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    pub fn projector(&self) -> &M {
        &self.projector
    }

    fn innovate(&mut self, state: &GaussianState, z: &DVector<f64>) -> Result<()> {
        check_state_dim(self.state_dim(), state)?;
        check_measurement_dim(self.measurement_dim(), z)?;
        let projection = self.projector.compute(&state.x)?;
        self.workspace
            .innovate(state, z, &projection.z, &projection.H, &projection.R)
    }
}

impl<P, M> StateEstimator for ExtendedKalmanFilter<P, M>
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
        trace!(trace_P = state.P.trace(), "ekf predict");
        Ok(())
    }

    fn update(&mut self, state: &mut GaussianState, z: &DVector<f64>) -> Result<Innovation> {
        self.innovate(state, z)?;
        self.workspace.correct(state)?;
        trace!(trace_P = state.P.trace(), "ekf update");
        Ok(self.workspace.innovation())
    }

    fn innovation(&mut self, state: &GaussianState, z: &DVector<f64>) -> Result<Innovation> {
        self.innovate(state, z)?;
        Ok(self.workspace.innovation())
    }
}
