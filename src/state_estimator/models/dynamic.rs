use super::{LinearPredictor, Prediction, TimedPredictor};
use crate::error::{FilterError, Result};
use nalgebra::{DMatrix, DVector};

/// Constant velocity in the plane, state [x, y, u, v].
#[derive(Debug, Clone)]
pub struct CV {
    // Acceleration noise standard deviation
    sigma_a: f64,
    ts: f64,
    F: DMatrix<f64>,
    Q: DMatrix<f64>,
}

impl CV {
    pub fn new(sigma_a: f64, ts: f64) -> Self {
        let mut F = DMatrix::<f64>::identity(4, 4);
        F.view_mut((0, 2), (2, 2))
            .copy_from(&(DMatrix::identity(2, 2) * ts));

        let mut Q = DMatrix::zeros(4, 4);
        Q.view_mut((0, 0), (2, 2))
            .fill_diagonal(ts.powi(3) / 3.0);
        Q.view_mut((2, 2), (2, 2)).fill_diagonal(ts);
        Q.view_mut((0, 2), (2, 2))
            .fill_diagonal(ts.powi(2) / 2.0);
        Q.view_mut((2, 0), (2, 2))
            .fill_diagonal(ts.powi(2) / 2.0);
        Q *= sigma_a.powi(2);

        CV { sigma_a, ts, F, Q }
    }

    pub fn sigma_a(&self) -> f64 {
        self.sigma_a
    }

    pub fn ts(&self) -> f64 {
        self.ts
    }
}

impl LinearPredictor for CV {
    fn transition(&self) -> &DMatrix<f64> {
        &self.F
    }

    fn process_noise(&self) -> &DMatrix<f64> {
        &self.Q
    }
}

/// Constant acceleration along one axis, state [p, v, a].
#[derive(Debug, Clone)]
pub struct CA {
    F: DMatrix<f64>,
    Q: DMatrix<f64>,
}

impl CA {
    /// `sigma_j` is the standard deviation of the jerk driving the acceleration.
    pub fn new(sigma_j: f64, ts: f64) -> Self {
        let F = DMatrix::from_row_slice(
            3,
            3,
            &[
                1., ts, ts.powi(2) / 2.,
                0., 1., ts,
                0., 0., 1.,
            ],
        );
        // Discrete white noise jerk
        let g = DVector::from_row_slice(&[ts.powi(3) / 6., ts.powi(2) / 2., ts]);
        let Q = &g * g.transpose() * sigma_j.powi(2);
        CA { F, Q }
    }
}

impl LinearPredictor for CA {
    fn transition(&self) -> &DMatrix<f64> {
        &self.F
    }

    fn process_noise(&self) -> &DMatrix<f64> {
        &self.Q
    }
}

/// A target that does not move: the leading `position_dim` entries are kept,
/// every derivative is reset to zero.
#[derive(Debug, Clone)]
pub struct Stationary {
    F: DMatrix<f64>,
    Q: DMatrix<f64>,
}

impl Stationary {
    pub fn new(state_dim: usize, position_dim: usize, sigma_p: f64) -> Result<Self> {
        if position_dim > state_dim {
            return Err(FilterError::dimension(state_dim, position_dim, "stationary position"));
        }
        let mut F = DMatrix::zeros(state_dim, state_dim);
        F.view_mut((0, 0), (position_dim, position_dim))
            .fill_diagonal(1.0);
        // Small noise on the derivatives keeps the covariance well conditioned
        let mut Q = DMatrix::identity(state_dim, state_dim) * 1e-6;
        Q.view_mut((0, 0), (position_dim, position_dim))
            .fill_diagonal(sigma_p.powi(2));
        Ok(Stationary { F, Q })
    }
}

impl LinearPredictor for Stationary {
    fn transition(&self) -> &DMatrix<f64> {
        &self.F
    }

    fn process_noise(&self) -> &DMatrix<f64> {
        &self.Q
    }
}

/// Coordinated turn, state [x, y, u, v, omega]. Continuous time: the
/// elapsed time is given on every call.
#[derive(Debug, Clone)]
pub struct CT {
    sigma_a: f64,
    sigma_w: f64,
    scratch: Prediction,
}

impl CT {
    pub fn new(sigma_a: f64, sigma_w: f64) -> Self {
        CT {
            sigma_a,
            sigma_w,
            scratch: Prediction::zeros(5),
        }
    }
}

fn ct_f(x: &DVector<f64>, ts: f64, out: &mut DVector<f64>) {
    let x0 = x[0];
    let y0 = x[1];
    let u0 = x[2];
    let v0 = x[3];
    let omega = x[4];

    let theta = omega * ts;

    let cth = theta.cos();
    let sth = theta.sin();

    let sincth = sinc(theta);
    let coscth = cosc(theta);

    out[0] = x0 + ts * u0 * sincth - ts * v0 * coscth;
    out[1] = y0 + ts * u0 * coscth + ts * v0 * sincth;
    out[2] = u0 * cth - v0 * sth;
    out[3] = u0 * sth + v0 * cth;
    out[4] = omega;
}

fn ct_F(x: &DVector<f64>, ts: f64, out: &mut DMatrix<f64>) {
    let u0 = x[2];
    let v0 = x[3];
    let omega = x[4];

    let theta = ts * omega;

    let sth = theta.sin();
    let cth = theta.cos();

    let sincth = sinc(theta);
    let coscth = cosc(theta);

    let dsincth = dsinc(theta);
    let dcoscth = dcosc(theta);

    out.copy_from_slice(&[
        // column major
        1., 0., 0., 0., 0.,
        0., 1., 0., 0., 0.,
        ts * sincth, ts * coscth, cth, sth, 0.,
        -ts * coscth, ts * sincth, -sth, cth, 0.,
        ts.powi(2) * (u0 * dsincth - v0 * dcoscth),
        ts.powi(2) * (u0 * dcoscth + v0 * dsincth),
        -ts * (u0 * sth + v0 * cth),
        ts * (u0 * cth - v0 * sth),
        1.,
    ]);
}

fn ct_Q(sigma_a: f64, sigma_w: f64, ts: f64, out: &mut DMatrix<f64>) {
    out.fill(0.0);
    out.view_mut((0, 0), (2, 2))
        .fill_diagonal(ts.powi(3) / 3.0);
    out.view_mut((2, 2), (2, 2)).fill_diagonal(ts);
    out.view_mut((0, 2), (2, 2))
        .fill_diagonal(ts.powi(2) / 2.0);
    out.view_mut((2, 0), (2, 2))
        .fill_diagonal(ts.powi(2) / 2.0);
    *out *= sigma_a.powi(2);
    out[(4, 4)] = ts * sigma_w.powi(2);
}

impl TimedPredictor for CT {
    fn state_dim(&self) -> usize {
        5
    }

    fn compute(
        &mut self,
        x: &DVector<f64>,
        u: Option<&DVector<f64>>,
        dt: f64,
    ) -> Result<&Prediction> {
        if x.len() != 5 {
            return Err(FilterError::dimension(5, x.len(), "coordinated turn state"));
        }
        if u.is_some() {
            return Err(FilterError::configuration(
                "coordinated turn model takes no control input",
            ));
        }
        ct_f(x, dt, &mut self.scratch.x);
        ct_F(x, dt, &mut self.scratch.F);
        ct_Q(self.sigma_a, self.sigma_w, dt, &mut self.scratch.Q);
        Ok(&self.scratch)
    }
}

// Computes sin(x)/x
fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-3 {
        1.0 - x.powi(2) / 6.0
    } else {
        x.sin() / x
    }
}

// Computes (1 - cos(x))/x
fn cosc(x: f64) -> f64 {
    if x.abs() < 1e-3 {
        x / 2.0 - x.powi(3) / 24.0
    } else {
        (1.0 - x.cos()) / x
    }
}

fn dsinc(x: f64) -> f64 {
    if x.abs() < 1e-3 {
        -x / 3.0
    } else {
        (x.cos() - sinc(x)) / x
    }
}

fn dcosc(x: f64) -> f64 {
    if x.abs() < 1e-3 {
        0.5 - x.powi(2) / 6.0
    } else {
        (x.sin() - cosc(x)) / x
    }
}
