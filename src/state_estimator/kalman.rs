use super::equations::{check_square, Workspace};
use super::models::{apply_transition, LinearPredictor, LinearProjector};
use super::{check_measurement_dim, check_state_dim, Innovation, StateEstimator};
use crate::error::{FilterError, Result};
use crate::gaussian::GaussianState;
use nalgebra::DVector;
use tracing::trace;

/// Linear Kalman filter over constant model matrices.
#[derive(Debug, Clone)]
pub struct KalmanFilter<P, M> {
    predictor: P,
    projector: M,
    x_pred: DVector<f64>,
    z_pred: DVector<f64>,
    workspace: Workspace,
}

impl<P, M> KalmanFilter<P, M>
where
    P: LinearPredictor,
    M: LinearProjector,
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
        check_square(n, predictor.transition(), "transition matrix")?;
        check_square(n, predictor.process_noise(), "process noise")?;
        check_square(m, projector.measurement_noise(), "measurement noise")?;

        Ok(KalmanFilter {
            predictor,
            projector,
            x_pred: DVector::zeros(n),
            z_pred: DVector::zeros(m),
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
        let H = self.projector.observation();
        H.mul_to(&state.x, &mut self.z_pred);
        self.workspace
            .innovate(state, z, &self.z_pred, H, self.projector.measurement_noise())
    }
}

impl<P, M> StateEstimator for KalmanFilter<P, M>
where
    P: LinearPredictor,
    M: LinearProjector,
{
    fn state_dim(&self) -> usize {
        self.predictor.state_dim()
    }

    fn measurement_dim(&self) -> usize {
        self.projector.measurement_dim()
    }

    fn predict(&mut self, state: &mut GaussianState, u: Option<&DVector<f64>>) -> Result<()> {
        check_state_dim(self.state_dim(), state)?;
        apply_transition(&self.predictor, &state.x, u, &mut self.x_pred)?;
        self.workspace.propagate(
            state,
            &self.x_pred,
            self.predictor.transition(),
            self.predictor.process_noise(),
        )?;
        trace!(trace_P = state.P.trace(), "kalman predict");
        Ok(())
    }

    fn update(&mut self, state: &mut GaussianState, z: &DVector<f64>) -> Result<Innovation> {
        self.innovate(state, z)?;
        self.workspace.correct(state)?;
        trace!(trace_P = state.P.trace(), "kalman update");
        Ok(self.workspace.innovation())
    }

    fn innovation(&mut self, state: &GaussianState, z: &DVector<f64>) -> Result<Innovation> {
        self.innovate(state, z)?;
        Ok(self.workspace.innovation())
    }
}
