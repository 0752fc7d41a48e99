//! Shared fixtures for the filter tests

use super::models::dynamic::CA;
use super::models::measurement::CartesianPosition;
use super::models::LinearSensor;
use super::StateEstimator;
use crate::gaussian::GaussianState;
use nalgebra::{DMatrix, DVector};

pub(crate) const TS: f64 = 1.0;
pub(crate) const SIGMA_J: f64 = 0.1;
pub(crate) const SIGMA_Z: f64 = 0.5;

pub(crate) fn ca() -> CA {
    CA::new(SIGMA_J, TS)
}

pub(crate) fn position_sensor() -> CartesianPosition {
    CartesianPosition::new(3, 1, SIGMA_Z).unwrap()
}

/// Observes the whole CA state
pub(crate) fn full_sensor() -> LinearSensor {
    LinearSensor::new(
        DMatrix::identity(3, 3),
        DMatrix::identity(3, 3) * SIGMA_Z.powi(2),
    )
    .unwrap()
}

pub(crate) fn prior() -> GaussianState {
    GaussianState::new(DVector::from_row_slice(&[0., 1., 2.]), DMatrix::identity(3, 3)).unwrap()
}

/// Position measurements of a CA target started at [0, 1, 2]
pub(crate) fn ca_measurements(k: usize) -> Vec<DVector<f64>> {
    (1..=k)
        .map(|i| {
            let t = i as f64 * TS;
            DVector::from_row_slice(&[t + t * t + 0.05 * (i as f64).sin()])
        })
        .collect()
}

pub(crate) fn assert_predict_grows_covariance<E: StateEstimator>(filter: &mut E) {
    let mut state = prior();
    let mut norm = state.P.norm();
    for _ in 0..5 {
        filter.predict(&mut state, None).unwrap();
        let next = state.P.norm();
        assert!(next > norm, "{} <= {}", next, norm);
        norm = next;
    }
}

/// Repeated updates with a measurement of the true state, observed in full
pub(crate) fn assert_update_converges<E: StateEstimator>(filter: &mut E) {
    let truth = DVector::from_row_slice(&[1., -1., 0.5]);
    let mut state = prior();
    let mut norm = state.P.norm();
    let mut error = (&state.x - &truth).norm();
    for _ in 0..5 {
        filter.update(&mut state, &truth).unwrap();
        let next_norm = state.P.norm();
        let next_error = (&state.x - &truth).norm();
        assert!(next_norm < norm, "{} >= {}", next_norm, norm);
        assert!(next_error < error, "{} >= {}", next_error, error);
        norm = next_norm;
        error = next_error;
    }
}
