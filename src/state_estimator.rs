pub mod ekf;
pub(crate) mod equations;
pub mod hinf;
pub mod imm;
pub mod kalman;
pub mod models;
#[cfg(test)]
pub(crate) mod testing;
pub mod ukf;

use crate::error::{FilterError, Result};
use crate::gaussian::{self, GaussianState};
use nalgebra::{DMatrix, DVector};

/// Measurement residual `y = z - ẑ` and its covariance `S`.
#[derive(Debug, Clone, PartialEq)]
pub struct Innovation {
    pub y: DVector<f64>,
    pub S: DMatrix<f64>,
}

impl Innovation {
    /// See [`gaussian::likelihood`].
    pub fn likelihood(&self) -> f64 {
        gaussian::likelihood(&self.y, &self.S)
    }

    /// See [`gaussian::log_likelihood`]; the −2·log form.
    pub fn log_likelihood(&self) -> f64 {
        gaussian::log_likelihood(&self.y, &self.S)
    }

    /// Normalized innovation squared, yᵗS⁻¹y.
    pub fn nis(&self) -> Result<f64> {
        let S_inv_y = self
            .S
            .clone()
            .cholesky()
            .ok_or_else(|| FilterError::singular("innovation covariance"))?
            .solve(&self.y);
        Ok(self.y.dot(&S_inv_y))
    }
}

/// A recursive estimator that mutates a caller-owned [`GaussianState`].
///
/// Implementations own their scratch buffers, so every method takes
/// `&mut self`. The state is never replaced, only its contents.
pub trait StateEstimator {
    fn state_dim(&self) -> usize;

    fn measurement_dim(&self) -> usize;

    fn predict(&mut self, state: &mut GaussianState, u: Option<&DVector<f64>>) -> Result<()>;

    /// Corrects `state` with `z` and returns the innovation it was corrected with.
    fn update(&mut self, state: &mut GaussianState, z: &DVector<f64>) -> Result<Innovation>;

    /// Innovation of `z` against `state`, leaving the state untouched.
    fn innovation(&mut self, state: &GaussianState, z: &DVector<f64>) -> Result<Innovation>;

    fn step(
        &mut self,
        state: &mut GaussianState,
        u: Option<&DVector<f64>>,
        z: &DVector<f64>,
    ) -> Result<Innovation> {
        self.predict(state, u)?;
        self.update(state, z)
    }

    /// Natural log of [`Innovation::likelihood`], −½·(ln|S| + yᵗS⁻¹y).
    fn loglikelihood(&mut self, state: &GaussianState, z: &DVector<f64>) -> Result<f64> {
        let innovation = self.innovation(state, z)?;
        Ok(-0.5 * innovation.log_likelihood())
    }

    fn gate(&mut self, state: &GaussianState, z: &DVector<f64>, gate_size_square: f64) -> Result<bool> {
        let nis = self.innovation(state, z)?.nis()?;
        Ok(nis <= gate_size_square)
    }
}

impl<S: StateEstimator + ?Sized> StateEstimator for Box<S> {
    fn state_dim(&self) -> usize {
        (**self).state_dim()
    }

    fn measurement_dim(&self) -> usize {
        (**self).measurement_dim()
    }

    fn predict(&mut self, state: &mut GaussianState, u: Option<&DVector<f64>>) -> Result<()> {
        (**self).predict(state, u)
    }

    fn update(&mut self, state: &mut GaussianState, z: &DVector<f64>) -> Result<Innovation> {
        (**self).update(state, z)
    }

    fn innovation(&mut self, state: &GaussianState, z: &DVector<f64>) -> Result<Innovation> {
        (**self).innovation(state, z)
    }

    fn loglikelihood(&mut self, state: &GaussianState, z: &DVector<f64>) -> Result<f64> {
        (**self).loglikelihood(state, z)
    }

    fn gate(&mut self, state: &GaussianState, z: &DVector<f64>, gate_size_square: f64) -> Result<bool> {
        (**self).gate(state, z, gate_size_square)
    }
}

pub(crate) fn check_state_dim(expected: usize, state: &GaussianState) -> Result<()> {
    if state.dim() != expected {
        return Err(FilterError::dimension(expected, state.dim(), "state"));
    }
    Ok(())
}

pub(crate) fn check_measurement_dim(expected: usize, z: &DVector<f64>) -> Result<()> {
    if z.len() != expected {
        return Err(FilterError::dimension(expected, z.len(), "measurement"));
    }
    Ok(())
}
