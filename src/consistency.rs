use crate::error::{FilterError, Result};
use crate::gaussian::GaussianState;
use crate::state_estimator::StateEstimator;
use nalgebra::DVector;

/// Filter consistency measures. Both are χ² distributed for a consistent
/// filter, with the measurement and state dimension as degrees of freedom.
pub trait Consistency {
    /// Normalized innovation squared of `z` against `state`.
    fn NIS(&mut self, state: &GaussianState, z: &DVector<f64>) -> Result<f64>;

    /// Normalized estimation error squared of `state` against the true state.
    fn NEES(&self, state: &GaussianState, x_gt: &DVector<f64>) -> Result<f64>;
}

impl<E: StateEstimator + ?Sized> Consistency for E {
    fn NIS(&mut self, state: &GaussianState, z: &DVector<f64>) -> Result<f64> {
        self.innovation(state, z)?.nis()
    }

    fn NEES(&self, state: &GaussianState, x_gt: &DVector<f64>) -> Result<f64> {
        nees(state, x_gt)
    }
}

pub fn nees(state: &GaussianState, x_gt: &DVector<f64>) -> Result<f64> {
    if x_gt.len() != state.dim() {
        return Err(FilterError::dimension(state.dim(), x_gt.len(), "true state"));
    }
    let x_err = &state.x - x_gt;
    let P_inv_x_err = state
        .P
        .clone()
        .cholesky()
        .ok_or_else(|| FilterError::singular("state covariance"))?
        .solve(&x_err);
    Ok(x_err.dot(&P_inv_x_err))
}
