pub mod dynamic;
pub mod measurement;

use crate::error::{FilterError, Result};
use nalgebra::{DMatrix, DVector};

/// Output of a predictor: predicted mean, transition Jacobian and process noise.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub x: DVector<f64>,
    pub F: DMatrix<f64>,
    pub Q: DMatrix<f64>,
}

impl Prediction {
    pub fn zeros(n: usize) -> Self {
        Prediction {
            x: DVector::zeros(n),
            F: DMatrix::zeros(n, n),
            Q: DMatrix::zeros(n, n),
        }
    }
}

/// Output of a projector: predicted measurement, its Jacobian and the
/// measurement noise.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub z: DVector<f64>,
    pub H: DMatrix<f64>,
    pub R: DMatrix<f64>,
}

impl Projection {
    pub fn zeros(n: usize, m: usize) -> Self {
        Projection {
            z: DVector::zeros(m),
            H: DMatrix::zeros(m, n),
            R: DMatrix::zeros(m, m),
        }
    }
}

/// Discrete-time dynamics, the contract consumed by the nonlinear filters.
pub trait Predictor {
    fn state_dim(&self) -> usize;

    /// Recomputes the prediction for `x` into the predictor's own buffer.
    ///
    /// The returned borrow is only valid until the next call.
    fn compute(&mut self, x: &DVector<f64>, u: Option<&DVector<f64>>) -> Result<&Prediction>;

    /// Owned copy of [`Predictor::compute`].
    fn predict(&mut self, x: &DVector<f64>, u: Option<&DVector<f64>>) -> Result<Prediction> {
        self.compute(x, u).map(Prediction::clone)
    }
}

/// Sensor model, the contract consumed by the nonlinear filters.
pub trait Projector {
    fn state_dim(&self) -> usize;
    fn measurement_dim(&self) -> usize;

    /// Recomputes the projection of `x` into the projector's own buffer.
    ///
    /// The returned borrow is only valid until the next call.
    fn compute(&mut self, x: &DVector<f64>) -> Result<&Projection>;

    /// Owned copy of [`Projector::compute`].
    fn project(&mut self, x: &DVector<f64>) -> Result<Projection> {
        self.compute(x).map(Projection::clone)
    }
}

/// Continuous-time dynamics that take the elapsed time on every call.
pub trait TimedPredictor {
    fn state_dim(&self) -> usize;
    fn compute(
        &mut self,
        x: &DVector<f64>,
        u: Option<&DVector<f64>>,
        dt: f64,
    ) -> Result<&Prediction>;
}

/// Linear dynamics x' = F·x + G·u with a precomputed, control-independent F.
pub trait LinearPredictor {
    fn transition(&self) -> &DMatrix<f64>;
    fn process_noise(&self) -> &DMatrix<f64>;

    fn control_gain(&self) -> Option<&DMatrix<f64>> {
        None
    }

    fn state_dim(&self) -> usize {
        self.transition().nrows()
    }
}

/// Linear sensor z = H·x.
pub trait LinearProjector {
    fn observation(&self) -> &DMatrix<f64>;
    fn measurement_noise(&self) -> &DMatrix<f64>;

    fn state_dim(&self) -> usize {
        self.observation().ncols()
    }

    fn measurement_dim(&self) -> usize {
        self.observation().nrows()
    }
}

/// Turns a [`TimedPredictor`] into a fixed-interval [`Predictor`].
#[derive(Debug, Clone)]
pub struct Discretized<P> {
    model: P,
    period: f64,
}

impl<P: TimedPredictor> Discretized<P> {
    pub fn new(model: P, period: f64) -> Result<Self> {
        if !(period.is_finite() && period >= 0.0) {
            return Err(FilterError::configuration(format!(
                "sampling period must be finite and non-negative, got {}",
                period
            )));
        }
        Ok(Discretized { model, period })
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn model(&self) -> &P {
        &self.model
    }
}

impl<P: TimedPredictor> Predictor for Discretized<P> {
    fn state_dim(&self) -> usize {
        self.model.state_dim()
    }

    fn compute(&mut self, x: &DVector<f64>, u: Option<&DVector<f64>>) -> Result<&Prediction> {
        self.model.compute(x, u, self.period)
    }
}

/// Lets a linear model satisfy the nonlinear contract: the Jacobian is the
/// model matrix and the prediction is the matrix applied to the state.
#[derive(Debug, Clone)]
pub struct Linearized<L, S> {
    model: L,
    scratch: S,
}

impl<L: LinearPredictor> Linearized<L, Prediction> {
    pub fn predictor(model: L) -> Self {
        let mut scratch = Prediction::zeros(model.state_dim());
        scratch.F.copy_from(model.transition());
        scratch.Q.copy_from(model.process_noise());
        Linearized { model, scratch }
    }
}

impl<L: LinearProjector> Linearized<L, Projection> {
    pub fn projector(model: L) -> Self {
        let mut scratch = Projection::zeros(model.state_dim(), model.measurement_dim());
        scratch.H.copy_from(model.observation());
        scratch.R.copy_from(model.measurement_noise());
        Linearized { model, scratch }
    }
}

impl<L, S> Linearized<L, S> {
    pub fn model(&self) -> &L {
        &self.model
    }
}

impl<L: LinearPredictor> Predictor for Linearized<L, Prediction> {
    fn state_dim(&self) -> usize {
        self.model.state_dim()
    }

    fn compute(&mut self, x: &DVector<f64>, u: Option<&DVector<f64>>) -> Result<&Prediction> {
        apply_transition(&self.model, x, u, &mut self.scratch.x)?;
        Ok(&self.scratch)
    }
}

impl<L: LinearProjector> Projector for Linearized<L, Projection> {
    fn state_dim(&self) -> usize {
        self.model.state_dim()
    }

    fn measurement_dim(&self) -> usize {
        self.model.measurement_dim()
    }

    fn compute(&mut self, x: &DVector<f64>) -> Result<&Projection> {
        let n = self.model.state_dim();
        if x.len() != n {
            return Err(FilterError::dimension(n, x.len(), "projected state"));
        }
        self.model.observation().mul_to(x, &mut self.scratch.z);
        Ok(&self.scratch)
    }
}

/// out = F·x (+ G·u)
pub(crate) fn apply_transition<L: LinearPredictor + ?Sized>(
    model: &L,
    x: &DVector<f64>,
    u: Option<&DVector<f64>>,
    out: &mut DVector<f64>,
) -> Result<()> {
    let n = model.state_dim();
    if x.len() != n {
        return Err(FilterError::dimension(n, x.len(), "predicted state"));
    }
    model.transition().mul_to(x, out);
    match (u, model.control_gain()) {
        (None, _) => {}
        (Some(u), Some(G)) => {
            if u.len() != G.ncols() {
                return Err(FilterError::dimension(G.ncols(), u.len(), "control input"));
            }
            out.gemv(1.0, G, u, 1.0);
        }
        (Some(_), None) => {
            return Err(FilterError::configuration(
                "control input given to a model without control gain",
            ))
        }
    }
    Ok(())
}

/// General linear dynamics with constant matrices.
#[derive(Debug, Clone)]
pub struct LinearModel {
    F: DMatrix<f64>,
    G: Option<DMatrix<f64>>,
    Q: DMatrix<f64>,
}

impl LinearModel {
    pub fn new(F: DMatrix<f64>, Q: DMatrix<f64>) -> Result<Self> {
        let n = F.nrows();
        if F.ncols() != n {
            return Err(FilterError::dimension(n, F.ncols(), "transition matrix columns"));
        }
        if Q.shape() != (n, n) {
            return Err(FilterError::dimension(n, Q.nrows(), "process noise"));
        }
        Ok(LinearModel { F, G: None, Q })
    }

    pub fn with_control(mut self, G: DMatrix<f64>) -> Result<Self> {
        if G.nrows() != self.F.nrows() {
            return Err(FilterError::dimension(self.F.nrows(), G.nrows(), "control gain rows"));
        }
        self.G = Some(G);
        Ok(self)
    }
}

impl LinearPredictor for LinearModel {
    fn transition(&self) -> &DMatrix<f64> {
        &self.F
    }

    fn process_noise(&self) -> &DMatrix<f64> {
        &self.Q
    }

    fn control_gain(&self) -> Option<&DMatrix<f64>> {
        self.G.as_ref()
    }
}

/// General linear sensor with constant matrices.
#[derive(Debug, Clone)]
pub struct LinearSensor {
    H: DMatrix<f64>,
    R: DMatrix<f64>,
}

impl LinearSensor {
    pub fn new(H: DMatrix<f64>, R: DMatrix<f64>) -> Result<Self> {
        let m = H.nrows();
        if R.shape() != (m, m) {
            return Err(FilterError::dimension(m, R.nrows(), "measurement noise"));
        }
        Ok(LinearSensor { H, R })
    }
}

impl LinearProjector for LinearSensor {
    fn observation(&self) -> &DMatrix<f64> {
        &self.H
    }

    fn measurement_noise(&self) -> &DMatrix<f64> {
        &self.R
    }
}

#[cfg(test)]
mod tests {
    use super::dynamic::CT;
    use super::*;

    fn ca_model() -> LinearModel {
        let F = DMatrix::from_row_slice(3, 3, &[1., 1., 0.5, 0., 1., 1., 0., 0., 1.]);
        LinearModel::new(F, DMatrix::identity(3, 3) * 0.01).unwrap()
    }

    #[test]
    fn test_linearized_predictor() {
        let mut predictor = Linearized::predictor(ca_model());
        let x = DVector::from_row_slice(&[0., 1., 2.]);
        let prediction = predictor.predict(&x, None).unwrap();
        assert_eq!(prediction.x, DVector::from_row_slice(&[2., 3., 2.]));
        assert_eq!(&prediction.F, predictor.model().transition());
        assert_eq!(&prediction.Q, predictor.model().process_noise());
    }

    #[test]
    fn test_linearized_predictor_with_control() {
        let G = DMatrix::from_row_slice(3, 1, &[0., 0., 1.]);
        let model = ca_model().with_control(G).unwrap();
        let mut predictor = Linearized::predictor(model);
        let x = DVector::from_row_slice(&[0., 1., 2.]);
        let u = DVector::from_row_slice(&[-2.]);
        let prediction = predictor.predict(&x, Some(&u)).unwrap();
        assert_eq!(prediction.x, DVector::from_row_slice(&[2., 3., 0.]));
    }

    #[test]
    fn test_control_without_gain_is_rejected() {
        let mut predictor = Linearized::predictor(ca_model());
        let x = DVector::from_row_slice(&[0., 1., 2.]);
        let u = DVector::from_row_slice(&[1.]);
        assert!(predictor.compute(&x, Some(&u)).is_err());
    }

    #[test]
    fn test_owned_prediction_survives_next_call() {
        let mut predictor = Linearized::predictor(ca_model());
        let first = predictor
            .predict(&DVector::from_row_slice(&[0., 1., 2.]), None)
            .unwrap();
        let _ = predictor
            .compute(&DVector::from_row_slice(&[5., 5., 5.]), None)
            .unwrap();
        assert_eq!(first.x, DVector::from_row_slice(&[2., 3., 2.]));
    }

    #[test]
    fn test_linearized_projector() {
        let H = DMatrix::from_row_slice(1, 3, &[1., 0., 0.]);
        let sensor = LinearSensor::new(H.clone(), DMatrix::identity(1, 1)).unwrap();
        let mut projector = Linearized::projector(sensor);
        let projection = projector
            .project(&DVector::from_row_slice(&[4., 1., 2.]))
            .unwrap();
        assert_eq!(projection.z, DVector::from_row_slice(&[4.]));
        assert_eq!(projection.H, H);
        assert!(projector.compute(&DVector::zeros(2)).is_err());
    }

    #[test]
    fn test_discretized_uses_stored_period() {
        let x = DVector::from_row_slice(&[0., 0., 1., 2., 0.]);
        let mut timed = CT::new(0.1, 0.01);
        let direct = TimedPredictor::compute(&mut timed, &x, None, 2.0)
            .unwrap()
            .clone();
        let mut discrete = Discretized::new(CT::new(0.1, 0.01), 2.0).unwrap();
        let curried = discrete.predict(&x, None).unwrap();
        assert_eq!(direct, curried);
        assert!(Discretized::new(CT::new(0.1, 0.01), -1.0).is_err());
    }

    #[test]
    fn test_linear_model_rejects_bad_shapes() {
        assert!(LinearModel::new(DMatrix::zeros(2, 3), DMatrix::zeros(2, 2)).is_err());
        assert!(LinearModel::new(DMatrix::zeros(2, 2), DMatrix::zeros(3, 3)).is_err());
        assert!(LinearSensor::new(DMatrix::zeros(1, 3), DMatrix::zeros(2, 2)).is_err());
    }
}
