use super::LinearProjector;
use crate::error::{FilterError, Result};
use nalgebra::DMatrix;

/// Direct, noisy observation of the leading `measured_dims` state entries.
#[derive(Debug, Clone)]
pub struct CartesianPosition {
    sigma_p: f64,
    H: DMatrix<f64>,
    R: DMatrix<f64>,
}

impl CartesianPosition {
    /// Assumes the position occupies the first entries of the state
    pub fn new(state_dim: usize, measured_dims: usize, sigma_p: f64) -> Result<Self> {
        if measured_dims == 0 || measured_dims > state_dim {
            return Err(FilterError::dimension(
                state_dim,
                measured_dims,
                "measured position dimensions",
            ));
        }
        let H = DMatrix::identity(measured_dims, state_dim);
        let R = DMatrix::<f64>::identity(measured_dims, measured_dims) * sigma_p.powi(2);
        Ok(CartesianPosition { sigma_p, H, R })
    }

    pub fn sigma_p(&self) -> f64 {
        self.sigma_p
    }
}

impl LinearProjector for CartesianPosition {
    fn observation(&self) -> &DMatrix<f64> {
        &self.H
    }

    fn measurement_noise(&self) -> &DMatrix<f64> {
        &self.R
    }
}
