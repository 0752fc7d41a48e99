//! Interacting multiple model estimator.
//!
//! A bank of filters, one per motion mode, each with its own state and mode
//! probability. One cycle:
//!
//! 1. mix: every mode starts from the probability-weighted combination of
//!    all mode states, converted into its own representation
//! 2. predict every mode from its mixed prior
//! 3. update every mode with the measurement and reweight the modes by
//!    their measurement likelihoods
//!
//! The modes either share one state representation
//! ([`InteractingMultipleModel::new`]) or are reconciled through a
//! [`StateConverter`] ([`InteractingMultipleModel::with_converter`]).

pub mod converter;

pub use converter::{ModelId, SameDimension, StateConverter, TruncatingConverter};

use crate::error::{FilterError, Result};
use crate::gaussian::GaussianState;
use crate::mixture::{discrete_bayes, reduce_mixture, MixtureParameters};
use crate::state_estimator::StateEstimator;
use itertools::izip;
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

const PROBABILITY_TOLERANCE: f64 = 1e-8;
const SYMMETRY_TOLERANCE: f64 = 1e-8;

/// Returns true if `PI` is square, has entries in [0, 1] and every row sums to one.
pub fn is_valid_markov_matrix(PI: &DMatrix<f64>) -> bool {
    PI.is_square()
        && !PI.is_empty()
        && PI.iter().all(|p| p.is_finite() && (0.0..=1.0).contains(p))
        && PI
            .row_iter()
            .all(|row| (row.sum() - 1.0).abs() <= PROBABILITY_TOLERANCE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialized,
    Predicted,
    Updated,
}

/// One mode: its filter, its state and its probability.
#[derive(Debug, Clone)]
pub struct Hypothesis<S> {
    filter: S,
    state: GaussianState,
    probability: f64,
}

impl<S> Hypothesis<S> {
    pub fn filter(&self) -> &S {
        &self.filter
    }

    pub fn state(&self) -> &GaussianState {
        &self.state
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}

#[derive(Debug, Clone)]
pub struct InteractingMultipleModel<S, C = SameDimension> {
    hypotheses: Vec<Hypothesis<S>>,
    PI: DMatrix<f64>,
    converter: C,
    phase: Phase,
}

impl<S: StateEstimator> InteractingMultipleModel<S, SameDimension> {
    /// Modes sharing one state representation.
    ///
    /// `initial` holds the initial mode probabilities and states, and
    /// `PI[(j, i)]` is the probability of switching from mode `j` to mode `i`.
    pub fn new(
        filters: Vec<S>,
        initial: MixtureParameters<GaussianState>,
        PI: DMatrix<f64>,
    ) -> Result<Self> {
        if let Some(first) = filters.first() {
            let n = first.state_dim();
            if let Some(other) = filters.iter().find(|f| f.state_dim() != n) {
                return Err(FilterError::dimension(
                    n,
                    other.state_dim(),
                    "mode state dimension",
                ));
            }
        }
        Self::with_converter(filters, initial, PI, SameDimension)
    }
}

impl<S, C> InteractingMultipleModel<S, C>
where
    S: StateEstimator,
    C: StateConverter,
{
    /// Modes of possibly different state representations.
    pub fn with_converter(
        filters: Vec<S>,
        initial: MixtureParameters<GaussianState>,
        PI: DMatrix<f64>,
        converter: C,
    ) -> Result<Self> {
        if filters.is_empty() {
            return Err(FilterError::configuration("IMM needs at least one mode"));
        }
        if initial.len() != filters.len() {
            return Err(FilterError::dimension(
                filters.len(),
                initial.len(),
                "initial modes",
            ));
        }
        if PI.nrows() != filters.len() {
            return Err(FilterError::dimension(
                filters.len(),
                PI.nrows(),
                "transition matrix",
            ));
        }
        if !is_valid_markov_matrix(&PI) {
            return Err(FilterError::configuration(
                "transition matrix is not row stochastic",
            ));
        }
        if !probabilities_are_valid(&initial.weights) {
            return Err(FilterError::configuration(format!(
                "initial mode probabilities {:?} are not a distribution",
                initial.weights
            )));
        }
        let m = filters[0].measurement_dim();
        for (filter, state) in filters.iter().zip(initial.components.iter()) {
            if filter.measurement_dim() != m {
                return Err(FilterError::dimension(
                    m,
                    filter.measurement_dim(),
                    "mode measurement dimension",
                ));
            }
            if state.dim() != filter.state_dim() {
                return Err(FilterError::dimension(
                    filter.state_dim(),
                    state.dim(),
                    "initial mode state",
                ));
            }
            state.validate()?;
        }

        let (weights, states) = initial.destructure();
        let hypotheses = izip!(filters, states, weights)
            .map(|(filter, state, probability)| Hypothesis {
                filter,
                state,
                probability,
            })
            .collect();

        Ok(InteractingMultipleModel {
            hypotheses,
            PI,
            converter,
            phase: Phase::Initialized,
        })
    }

    pub fn hypotheses(&self) -> &[Hypothesis<S>] {
        &self.hypotheses
    }

    pub fn probabilities(&self) -> Vec<f64> {
        self.hypotheses.iter().map(|h| h.probability).collect()
    }

    pub fn transition_matrix(&self) -> &DMatrix<f64> {
        &self.PI
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn measurement_dim(&self) -> usize {
        self.hypotheses[0].filter.measurement_dim()
    }

    /// Mixes the mode states and predicts every mode from its mixed prior.
    pub fn predict(&mut self, u: Option<&DVector<f64>>) -> Result<()> {
        let (predicted, mixing) = discrete_bayes(&self.probabilities(), &self.PI)?;

        // Every prior is computed before any mode state is overwritten
        let mixed = (0..self.hypotheses.len())
            .map(|i| self.mixed_prior(i, mixing.row(i).iter().copied()))
            .collect::<Result<Vec<_>>>()?;

        for (h, prior, probability) in izip!(self.hypotheses.iter_mut(), mixed, predicted) {
            h.state.assign(&prior)?;
            h.filter.predict(&mut h.state, u)?;
            h.probability = probability;
        }
        self.phase = Phase::Predicted;
        self.sanity_check()
    }

    /// Updates every mode with `z` and reweights the modes.
    pub fn update(&mut self, z: &DVector<f64>) -> Result<()> {
        let mut log_joint = Vec::with_capacity(self.hypotheses.len());
        for h in self.hypotheses.iter_mut() {
            let innovation = h.filter.update(&mut h.state, z)?;
            log_joint.push(h.probability.ln() - 0.5 * innovation.log_likelihood());
        }

        let normalizer = log_sum_exp(&log_joint);
        if !normalizer.is_finite() {
            return Err(sanity_failure(format!(
                "mode probabilities cannot be normalized, log weights {:?}",
                log_joint
            )));
        }
        for (h, l) in self.hypotheses.iter_mut().zip(log_joint) {
            h.probability = (l - normalizer).exp();
        }
        self.phase = Phase::Updated;
        debug!(probabilities = ?self.probabilities(), "imm update");
        self.sanity_check()
    }

    pub fn step(&mut self, u: Option<&DVector<f64>>, z: &DVector<f64>) -> Result<()> {
        self.predict(u)?;
        self.update(z)
    }

    /// Moment-matched combination of every mode in the output representation.
    pub fn combine(&self) -> Result<GaussianState> {
        let outputs = self
            .hypotheses
            .iter()
            .enumerate()
            .map(|(id, h)| self.converter.convert_output(&h.state, id))
            .collect::<Result<Vec<_>>>()?;
        reduce_mixture(&self.probabilities(), &outputs)
    }

    /// ln Σᵢ μᵢ·Lᵢ(z) over the current mode states.
    pub fn measurement_loglikelihood(&mut self, z: &DVector<f64>) -> Result<f64> {
        let mut log_joint = Vec::with_capacity(self.hypotheses.len());
        for h in self.hypotheses.iter_mut() {
            log_joint.push(h.probability.ln() + h.filter.loglikelihood(&h.state, z)?);
        }
        Ok(log_sum_exp(&log_joint))
    }

    /// True if any mode gates `z`.
    pub fn gate(&mut self, z: &DVector<f64>, gate_size_square: f64) -> Result<bool> {
        for h in self.hypotheses.iter_mut() {
            if h.filter.gate(&h.state, z, gate_size_square)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Checks that the probabilities form a distribution and every mode state
    /// is finite with a symmetric covariance.
    pub fn sanity_check(&self) -> Result<()> {
        let probabilities = self.probabilities();
        if !probabilities_are_valid(&probabilities) {
            return Err(sanity_failure(format!(
                "mode probabilities {:?} are not a distribution",
                probabilities
            )));
        }
        for (id, h) in self.hypotheses.iter().enumerate() {
            if !h.state.is_finite() {
                return Err(sanity_failure(format!("mode {} state is not finite", id)));
            }
            let scale = h.state.P.amax().max(1.0);
            if !h.state.is_symmetric(SYMMETRY_TOLERANCE * scale) {
                return Err(sanity_failure(format!(
                    "mode {} covariance is not symmetric",
                    id
                )));
            }
        }
        Ok(())
    }

    // Probability-weighted combination of every mode state in the
    // representation of mode `target`
    fn mixed_prior<I>(&self, target: ModelId, weights: I) -> Result<GaussianState>
    where
        I: Iterator<Item = f64>,
    {
        let n = self.hypotheses[target].state.dim();
        let mut used_weights = Vec::with_capacity(self.hypotheses.len());
        let mut converted = Vec::with_capacity(self.hypotheses.len());
        for (source, (h, w)) in self.hypotheses.iter().zip(weights).enumerate() {
            // Zero weight sources contribute nothing and may not be convertible
            if w == 0.0 {
                continue;
            }
            let mut state = GaussianState::zeros(n);
            self.converter.convert(&h.state, source, target, &mut state)?;
            used_weights.push(w);
            converted.push(state);
        }
        reduce_mixture(&used_weights, &converted)
    }
}

fn probabilities_are_valid(probabilities: &[f64]) -> bool {
    let in_range = probabilities
        .iter()
        .all(|p| p.is_finite() && *p >= -PROBABILITY_TOLERANCE && *p <= 1.0 + PROBABILITY_TOLERANCE);
    let sum: f64 = probabilities.iter().sum();
    in_range && (sum - 1.0).abs() <= PROBABILITY_TOLERANCE
}

fn sanity_failure(description: String) -> FilterError {
    warn!(%description, "imm sanity check failed");
    FilterError::SanityCheck { description }
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::gaussian::is_similar;
    use crate::state_estimator::kalman::KalmanFilter;
    use crate::state_estimator::models::dynamic::{Stationary, CA};
    use crate::state_estimator::models::measurement::CartesianPosition;
    use crate::state_estimator::models::LinearModel;
    use crate::state_estimator::testing::{self, SIGMA_Z};

    type CaFilter = KalmanFilter<CA, CartesianPosition>;

    fn ca_filter() -> CaFilter {
        KalmanFilter::new(testing::ca(), testing::position_sensor()).unwrap()
    }

    fn uniform(n: usize, state: &GaussianState) -> MixtureParameters<GaussianState> {
        MixtureParameters::new(vec![1.0 / n as f64; n], vec![state.clone(); n]).unwrap()
    }

    fn sticky(n: usize) -> DMatrix<f64> {
        let off = 0.1 / (n - 1) as f64;
        DMatrix::from_fn(n, n, |i, j| if i == j { 0.9 } else { off })
    }

    #[test]
    fn test_is_valid_markov_matrix() {
        let PI = DMatrix::<f64>::identity(3, 3);
        assert!(is_valid_markov_matrix(&PI));
        for i in 0..3 {
            for j in 0..3 {
                if i != j {
                    let mut mutated = PI.clone();
                    mutated[(i, j)] = 0.2;
                    assert!(!is_valid_markov_matrix(&mutated));
                }
            }
        }
        assert!(is_valid_markov_matrix(&sticky(3)));
        assert!(!is_valid_markov_matrix(&DMatrix::from_element(2, 3, 0.5)));
        assert!(!is_valid_markov_matrix(&DMatrix::from_row_slice(
            2,
            2,
            &[1.5, -0.5, 0., 1.]
        )));
    }

    #[test]
    fn test_identical_modes_match_single_filter() {
        let n = 3;
        let prior = testing::prior();
        let mut imm = InteractingMultipleModel::new(
            (0..n).map(|_| ca_filter()).collect(),
            uniform(n, &prior),
            sticky(n),
        )
        .unwrap();
        let mut kf = ca_filter();
        let mut state = prior;

        for z in testing::ca_measurements(10) {
            imm.predict(None).unwrap();
            kf.predict(&mut state, None).unwrap();
            assert!(is_similar(&imm.combine().unwrap(), &state, 1e-8, 1e-8));

            imm.update(&z).unwrap();
            kf.update(&mut state, &z).unwrap();
            assert!(is_similar(&imm.combine().unwrap(), &state, 1e-8, 1e-8));
            for p in imm.probabilities() {
                assert!((p - 1.0 / n as f64).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_moving_model_wins() {
        let moving: Box<dyn StateEstimator> = Box::new(ca_filter());
        let stationary: Box<dyn StateEstimator> = Box::new(
            KalmanFilter::new(Stationary::new(3, 1, 0.1).unwrap(), testing::position_sensor())
                .unwrap(),
        );
        let PI = DMatrix::from_row_slice(2, 2, &[0.95, 0.05, 0.05, 0.95]);
        let mut imm =
            InteractingMultipleModel::new(vec![stationary, moving], uniform(2, &testing::prior()), PI)
                .unwrap();

        for z in testing::ca_measurements(20) {
            imm.step(None, &z).unwrap();
        }
        let probabilities = imm.probabilities();
        assert!(probabilities[1] > 0.9, "probabilities = {:?}", probabilities);
        assert!((probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_heterogeneous_modes() {
        // [p, v] constant velocity next to the [p, v, a] constant acceleration
        let F = DMatrix::from_row_slice(2, 2, &[1., 1., 0., 1.]);
        let cv = LinearModel::new(F, DMatrix::identity(2, 2) * 0.01).unwrap();
        let cv_filter: Box<dyn StateEstimator> = Box::new(
            KalmanFilter::new(cv, CartesianPosition::new(2, 1, SIGMA_Z).unwrap()).unwrap(),
        );
        let ca_filter: Box<dyn StateEstimator> = Box::new(ca_filter());

        let default = GaussianState::from_diagonal(
            DVector::zeros(3),
            &DVector::from_row_slice(&[100., 100., 4.]),
        )
        .unwrap();
        let converter = TruncatingConverter::new(vec![2, 3], 3)
            .with_default(default)
            .unwrap();
        let initial = MixtureParameters::new(
            vec![0.5, 0.5],
            vec![testing::prior().sub_state(0, 2).unwrap(), testing::prior()],
        )
        .unwrap();
        let PI = DMatrix::from_row_slice(2, 2, &[0.98, 0.02, 0.02, 0.98]);
        let mut imm =
            InteractingMultipleModel::with_converter(vec![cv_filter, ca_filter], initial, PI, converter)
                .unwrap();

        for z in testing::ca_measurements(20) {
            imm.step(None, &z).unwrap();
            assert_eq!(imm.hypotheses()[0].state().dim(), 2);
            assert_eq!(imm.hypotheses()[1].state().dim(), 3);
        }
        let combined = imm.combine().unwrap();
        assert_eq!(combined.dim(), 3);
        assert!((combined.x[0] - 420.0).abs() < 2.0, "x = {}", combined.x);
        assert!(imm.probabilities()[1] > 0.9);
    }

    #[test]
    fn test_growing_without_default_fails_on_predict() {
        let F = DMatrix::from_row_slice(2, 2, &[1., 1., 0., 1.]);
        let cv = LinearModel::new(F, DMatrix::identity(2, 2) * 0.01).unwrap();
        let cv_filter: Box<dyn StateEstimator> = Box::new(
            KalmanFilter::new(cv, CartesianPosition::new(2, 1, SIGMA_Z).unwrap()).unwrap(),
        );
        let ca_filter: Box<dyn StateEstimator> = Box::new(ca_filter());
        let initial = MixtureParameters::new(
            vec![0.5, 0.5],
            vec![testing::prior().sub_state(0, 2).unwrap(), testing::prior()],
        )
        .unwrap();
        let PI = DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.1, 0.9]);
        let mut imm = InteractingMultipleModel::with_converter(
            vec![cv_filter, ca_filter],
            initial,
            PI,
            TruncatingConverter::new(vec![2, 3], 3),
        )
        .unwrap();
        let err = imm.predict(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_rejects_bad_construction() {
        let prior = testing::prior();
        let not_stochastic = DMatrix::from_row_slice(2, 2, &[0.9, 0.2, 0.1, 0.9]);
        let err = InteractingMultipleModel::new(
            vec![ca_filter(), ca_filter()],
            uniform(2, &prior),
            not_stochastic,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let bad_weights = MixtureParameters::new(vec![0.7, 0.7], vec![prior.clone(), prior.clone()])
            .unwrap();
        assert!(InteractingMultipleModel::new(vec![ca_filter(), ca_filter()], bad_weights, sticky(2))
            .is_err());

        assert!(
            InteractingMultipleModel::new(vec![ca_filter()], uniform(2, &prior), sticky(2)).is_err()
        );

        let wrong_dim = MixtureParameters::new(vec![1.0], vec![GaussianState::zeros(2)]).unwrap();
        assert!(InteractingMultipleModel::new(
            vec![ca_filter()],
            wrong_dim,
            DMatrix::identity(1, 1)
        )
        .is_err());
    }

    #[test]
    fn test_phase_transitions() {
        let mut imm =
            InteractingMultipleModel::new(vec![ca_filter(), ca_filter()], uniform(2, &testing::prior()), sticky(2))
                .unwrap();
        assert_eq!(imm.phase(), Phase::Initialized);

        // An explicit initial state allows updating right away
        let z = DVector::from_row_slice(&[0.2]);
        imm.update(&z).unwrap();
        assert_eq!(imm.phase(), Phase::Updated);

        imm.predict(None).unwrap();
        imm.predict(None).unwrap();
        assert_eq!(imm.phase(), Phase::Predicted);
    }

    #[test]
    fn test_sanity_check_flags_divergence() {
        let mut imm =
            InteractingMultipleModel::new(vec![ca_filter(), ca_filter()], uniform(2, &testing::prior()), sticky(2))
                .unwrap();
        assert!(imm.sanity_check().is_ok());

        imm.hypotheses[0].state.P[(0, 1)] = 5.0;
        assert_eq!(imm.sanity_check().unwrap_err().kind(), ErrorKind::SanityCheck);

        imm.hypotheses[0].state = testing::prior();
        imm.hypotheses[1].probability = 0.7;
        assert_eq!(imm.sanity_check().unwrap_err().kind(), ErrorKind::SanityCheck);

        imm.hypotheses[1].probability = 0.5;
        imm.hypotheses[1].state.x[2] = f64::NAN;
        assert_eq!(imm.sanity_check().unwrap_err().kind(), ErrorKind::SanityCheck);
    }

    #[test]
    fn test_gate_and_loglikelihood() {
        let mut imm =
            InteractingMultipleModel::new(vec![ca_filter(), ca_filter()], uniform(2, &testing::prior()), sticky(2))
                .unwrap();
        let near = DVector::from_row_slice(&[0.1]);
        let far = DVector::from_row_slice(&[50.]);
        assert!(imm.gate(&near, 9.0).unwrap());
        assert!(!imm.gate(&far, 9.0).unwrap());

        // Identical modes: the mixture likelihood is the single mode's
        let mut kf = ca_filter();
        let single = kf.loglikelihood(&testing::prior(), &near).unwrap();
        let mixed = imm.measurement_loglikelihood(&near).unwrap();
        assert!((single - mixed).abs() < 1e-12);
    }

    #[test]
    fn test_log_sum_exp() {
        let values = [-1000.0, -1000.0];
        assert!((log_sum_exp(&values) - (-1000.0 + 2f64.ln())).abs() < 1e-9);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }
}
