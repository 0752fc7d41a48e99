//! Recursive Bayesian estimation over Gaussian states.
//!
//! A family of filters sharing one state type and one pair of model
//! abstractions:
//!
//! - [`KalmanFilter`] for linear models
//! - [`ExtendedKalmanFilter`] for nonlinear models, linearized every step
//! - [`UnscentedKalmanFilter`] using the unscented transform
//! - [`DiscreteHInfinityFilter`], a robust alternative to the Kalman update
//! - [`InteractingMultipleModel`] mixing a bank of any of the above
//!
//! Filters never own the estimate. The caller keeps a [`GaussianState`] and
//! the filters mutate it in place.
#![allow(non_snake_case)]
pub mod consistency;
pub mod error;
pub mod gaussian;
pub mod mixture;
pub mod simulator;
pub mod state_estimator;

pub use error::{ErrorKind, FilterError, Result};
pub use gaussian::GaussianState;
pub use state_estimator::ekf::ExtendedKalmanFilter;
pub use state_estimator::hinf::{DiscreteHInfinityFilter, HInfinityConfig};
pub use state_estimator::imm::InteractingMultipleModel;
pub use state_estimator::kalman::KalmanFilter;
pub use state_estimator::ukf::{UkfConfig, UnscentedKalmanFilter};
pub use state_estimator::{Innovation, StateEstimator};
