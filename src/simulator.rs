//! Ground truth and measurement generation for linear models

use crate::error::{FilterError, Result};
use crate::gaussian::GaussianState;
use crate::state_estimator::equations::check_square;
use crate::state_estimator::models::{apply_transition, LinearPredictor, LinearProjector};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Simulates x' = F·x + w, z = H·x + v with w ~ N(0, Q) and v ~ N(0, R).
///
/// Seeded, so a run is reproducible.
#[derive(Debug, Clone)]
pub struct LinearSimulator<P, M> {
    predictor: P,
    projector: M,
    process_noise: GaussianState,
    measurement_noise: GaussianState,
    truth: DVector<f64>,
    scratch: DVector<f64>,
    rng: StdRng,
}

impl<P, M> LinearSimulator<P, M>
where
    P: LinearPredictor,
    M: LinearProjector,
{
    pub fn new(predictor: P, projector: M, x0: DVector<f64>, seed: u64) -> Result<Self> {
        let n = predictor.state_dim();
        if projector.state_dim() != n {
            return Err(FilterError::dimension(
                n,
                projector.state_dim(),
                "projector state dimension",
            ));
        }
        if x0.len() != n {
            return Err(FilterError::dimension(n, x0.len(), "initial true state"));
        }
        let m = projector.measurement_dim();
        check_square(n, predictor.process_noise(), "process noise")?;
        check_square(m, projector.measurement_noise(), "measurement noise")?;

        let process_noise =
            GaussianState::new(DVector::zeros(n), predictor.process_noise().clone())?;
        let measurement_noise =
            GaussianState::new(DVector::zeros(m), projector.measurement_noise().clone())?;

        Ok(LinearSimulator {
            predictor,
            projector,
            process_noise,
            measurement_noise,
            truth: x0,
            scratch: DVector::zeros(n),
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn truth(&self) -> &DVector<f64> {
        &self.truth
    }

    /// Advances the true state one step and measures it. Returns the new true
    /// state and its measurement.
    pub fn step(&mut self, u: Option<&DVector<f64>>) -> Result<(DVector<f64>, DVector<f64>)> {
        apply_transition(&self.predictor, &self.truth, u, &mut self.scratch)?;
        self.truth = &self.scratch + self.process_noise.random_draw(&mut self.rng)?;

        let z = self.projector.observation() * &self.truth
            + self.measurement_noise.random_draw(&mut self.rng)?;
        Ok((self.truth.clone(), z))
    }

    /// `k` steps without control input.
    pub fn run(&mut self, k: usize) -> Result<Vec<(DVector<f64>, DVector<f64>)>> {
        (0..k).map(|_| self.step(None)).collect()
    }

    pub fn observation(&self) -> &DMatrix<f64> {
        self.projector.observation()
    }
}
