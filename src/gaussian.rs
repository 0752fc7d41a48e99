//! Gaussian state estimate and the statistical helpers shared by every filter

use crate::error::{FilterError, Result};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

// Relative to the largest covariance entry
const SYMMETRY_TOLERANCE: f64 = 1e-8;
const PSD_TOLERANCE: f64 = 1e-9;

/// Mean `x` and covariance `P` of a Gaussian estimate.
///
/// Filters mutate a state in place on predict/update; they never swap it for a
/// new one, so references held by the caller stay valid.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianState {
    pub x: DVector<f64>,
    pub P: DMatrix<f64>,
}

impl GaussianState {
    pub fn new(x: DVector<f64>, P: DMatrix<f64>) -> Result<Self> {
        let n = x.len();
        if P.nrows() != n {
            return Err(FilterError::dimension(n, P.nrows(), "covariance rows"));
        }
        if P.ncols() != n {
            return Err(FilterError::dimension(n, P.ncols(), "covariance columns"));
        }
        Ok(GaussianState { x, P })
    }

    /// Zero mean, zero covariance.
    pub fn zeros(n: usize) -> Self {
        GaussianState {
            x: DVector::zeros(n),
            P: DMatrix::zeros(n, n),
        }
    }

    pub fn from_diagonal(x: DVector<f64>, variances: &DVector<f64>) -> Result<Self> {
        GaussianState::new(x, DMatrix::from_diagonal(variances))
    }

    pub fn dim(&self) -> usize {
        self.x.len()
    }

    /// Copies the contents of `other` into `self` without reallocating.
    pub fn assign(&mut self, other: &GaussianState) -> Result<()> {
        if other.dim() != self.dim() {
            return Err(FilterError::dimension(self.dim(), other.dim(), "state assignment"));
        }
        self.x.copy_from(&other.x);
        self.P.copy_from(&other.P);
        Ok(())
    }

    pub fn is_finite(&self) -> bool {
        self.x.iter().chain(self.P.iter()).all(|v| v.is_finite())
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        let n = self.dim();
        (0..n).all(|i| (0..i).all(|j| (self.P[(i, j)] - self.P[(j, i)]).abs() <= tolerance))
    }

    /// Checks that the estimate is finite and the covariance symmetric PSD.
    pub fn validate(&self) -> Result<()> {
        if !self.is_finite() {
            return Err(FilterError::NonFinite {
                context: "state estimate".to_string(),
            });
        }
        if self.dim() == 0 {
            return Ok(());
        }
        let scale = self.P.amax().max(1.0);
        if !self.is_symmetric(SYMMETRY_TOLERANCE * scale) {
            return Err(FilterError::NotPositiveSemiDefinite {
                context: "covariance is not symmetric".to_string(),
            });
        }
        let min_eigenvalue = self.P.clone().symmetric_eigen().eigenvalues.min();
        if min_eigenvalue < -PSD_TOLERANCE * scale {
            return Err(FilterError::NotPositiveSemiDefinite {
                context: format!("covariance has eigenvalue {:e}", min_eigenvalue),
            });
        }
        Ok(())
    }

    /// Extracts the index range `[a, b)`. Cross terms outside the range are dropped.
    pub fn sub_state(&self, a: usize, b: usize) -> Result<GaussianState> {
        if a > b || b > self.dim() {
            return Err(FilterError::configuration(format!(
                "sub-state range [{}, {}) outside state of dimension {}",
                a,
                b,
                self.dim()
            )));
        }
        let len = b - a;
        let x = self.x.rows(a, len).into_owned();
        let P = self.P.view((a, a), (len, len)).into_owned();
        Ok(GaussianState { x, P })
    }

    /// Writes `sub` into the range starting at `offset`, zeroing the cross
    /// terms between that range and the rest of the state.
    pub fn merge(&mut self, offset: usize, sub: &GaussianState) -> Result<()> {
        let n = self.dim();
        let len = sub.dim();
        if offset + len > n {
            return Err(FilterError::dimension(n, offset + len, "merged sub-state"));
        }
        self.x.rows_mut(offset, len).copy_from(&sub.x);
        self.P.view_mut((offset, 0), (len, n)).fill(0.0);
        self.P.view_mut((0, offset), (n, len)).fill(0.0);
        self.P.view_mut((offset, offset), (len, len)).copy_from(&sub.P);
        Ok(())
    }

    /// Samples from N(x, P).
    pub fn random_draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<DVector<f64>> {
        let n = self.dim();
        let L = matrix_square_root(&self.P)?;
        let w: DVector<f64> = DVector::from_fn(n, |_, _| StandardNormal.sample(&mut *rng));
        Ok(&self.x + L * w)
    }
}

// Cholesky factor when P is positive definite, eigen square root when it is
// only semi-definite.
fn matrix_square_root(P: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if let Some(chol) = P.clone().cholesky() {
        return Ok(chol.l());
    }
    let eigen = P.clone().symmetric_eigen();
    if eigen.eigenvalues.iter().any(|l| *l < -PSD_TOLERANCE * P.amax().max(1.0)) {
        return Err(FilterError::NotPositiveSemiDefinite {
            context: "covariance of random draw".to_string(),
        });
    }
    let sqrt_values = eigen.eigenvalues.map(|l| l.max(0.0).sqrt());
    Ok(&eigen.eigenvectors * DMatrix::from_diagonal(&sqrt_values))
}

/// Likelihood of an innovation: (1/√|S|)·exp(−½·yᵗS⁻¹y).
///
/// The (2π)^(m/2) factor is left out; it cancels whenever likelihoods of the
/// same measurement are compared. A singular `S` gives 0 and non-finite input
/// propagates as NaN.
pub fn likelihood(y: &DVector<f64>, S: &DMatrix<f64>) -> f64 {
    let S_inv = match S.clone().try_inverse() {
        Some(S_inv) => S_inv,
        None => return 0.0,
    };
    let det = S.determinant();
    (-0.5 * chi_square(y, &S_inv)).exp() / det.sqrt()
}

/// The −2·log form of [`likelihood`]: ln|S| + yᵗS⁻¹y.
///
/// Smaller is more likely. A singular `S` gives +∞.
pub fn log_likelihood(y: &DVector<f64>, S: &DMatrix<f64>) -> f64 {
    match S.clone().try_inverse() {
        Some(S_inv) => S.determinant().ln() + chi_square(y, &S_inv),
        None => f64::INFINITY,
    }
}

/// yᵗS⁻¹y, taking the already inverted covariance.
pub fn chi_square(y: &DVector<f64>, S_inv: &DMatrix<f64>) -> f64 {
    // row = yᵗS⁻¹, then row·y
    let row = y.tr_mul(S_inv);
    row.iter().zip(y.iter()).map(|(r, v)| r * v).sum()
}

/// True iff every mean entry differs by at most `mean_tol` and every
/// covariance entry by at most `cov_tol`.
pub fn is_similar(a: &GaussianState, b: &GaussianState, mean_tol: f64, cov_tol: f64) -> bool {
    if a.dim() != b.dim() {
        return false;
    }
    let mean_close = a
        .x
        .iter()
        .zip(b.x.iter())
        .all(|(u, v)| (u - v).abs() <= mean_tol);
    let cov_close = a
        .P
        .iter()
        .zip(b.P.iter())
        .all(|(u, v)| (u - v).abs() <= cov_tol);
    mean_close && cov_close
}

/// Extracts `[a, b)` from `orig`. See [`GaussianState::sub_state`].
pub fn sub_state(orig: &GaussianState, a: usize, b: usize) -> Result<GaussianState> {
    orig.sub_state(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn state_3d() -> GaussianState {
        let x = DVector::from_row_slice(&[1., 2., 3.]);
        let P = DMatrix::from_row_slice(3, 3, &[4., 1., 0.5, 1., 3., 0.2, 0.5, 0.2, 2.]);
        GaussianState::new(x, P).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_dimensions() {
        let x = DVector::zeros(3);
        let P = DMatrix::identity(2, 2);
        let err = GaussianState::new(x, P).unwrap_err();
        assert!(matches!(err, FilterError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_likelihood() {
        let y = DVector::from_row_slice(&[1., 0.]);
        let S = DMatrix::from_diagonal(&DVector::from_row_slice(&[4., 1.]));
        // 1/sqrt(4) * exp(-0.5 * 1/4)
        let expected = 0.5 * (-0.125f64).exp();
        assert!((likelihood(&y, &S) - expected).abs() < 1e-12);

        let at_mean = likelihood(&DVector::zeros(2), &S);
        assert!(at_mean > likelihood(&y, &S));
    }

    #[test]
    fn test_likelihood_singular_is_zero() {
        let y = DVector::from_row_slice(&[1., 0.]);
        let S = DMatrix::zeros(2, 2);
        assert_eq!(likelihood(&y, &S), 0.0);
        assert!(log_likelihood(&y, &S).is_infinite());
    }

    #[test]
    fn test_log_likelihood_matches_likelihood() {
        let y = DVector::from_row_slice(&[0.3, -1.2]);
        let S = DMatrix::from_row_slice(2, 2, &[2., 0.3, 0.3, 1.5]);
        let l = likelihood(&y, &S);
        let ll = log_likelihood(&y, &S);
        assert!((-2.0 * l.ln() - ll).abs() < 1e-10);
    }

    #[test]
    fn test_chi_square() {
        let y = DVector::from_row_slice(&[1., 2.]);
        let S_inv = DMatrix::from_row_slice(2, 2, &[2., 0.5, 0.5, 1.]);
        // [1 2] * S_inv * [1 2]' = 2 + 2*0.5*2 + 4
        assert!((chi_square(&y, &S_inv) - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_is_similar() {
        let a = state_3d();
        let mut b = a.clone();
        assert!(is_similar(&a, &b, 1e-9, 1e-9));
        b.x[1] += 1e-3;
        assert!(!is_similar(&a, &b, 1e-4, 1e-9));
        assert!(is_similar(&a, &b, 1e-2, 1e-9));
        b.P[(2, 2)] += 1e-3;
        assert!(!is_similar(&a, &b, 1e-2, 1e-4));
        assert!(!is_similar(&a, &GaussianState::zeros(2), 1., 1.));
    }

    #[test]
    fn test_sub_state() {
        let s = state_3d();
        let sub = sub_state(&s, 1, 3).unwrap();
        assert_eq!(sub.dim(), 2);
        assert_eq!(sub.x, DVector::from_row_slice(&[2., 3.]));
        assert_eq!(sub.P, DMatrix::from_row_slice(2, 2, &[3., 0.2, 0.2, 2.]));
        assert!(s.sub_state(2, 4).is_err());
    }

    #[test]
    fn test_merge() {
        let mut s = state_3d();
        let sub = GaussianState::new(
            DVector::from_row_slice(&[9.]),
            DMatrix::from_row_slice(1, 1, &[7.]),
        )
        .unwrap();
        s.merge(1, &sub).unwrap();
        assert_eq!(s.x, DVector::from_row_slice(&[1., 9., 3.]));
        assert_eq!(s.P[(1, 1)], 7.);
        assert_eq!(s.P[(0, 1)], 0.);
        assert_eq!(s.P[(2, 1)], 0.);
        assert_eq!(s.P[(0, 2)], 0.5);
        assert!(s.merge(3, &sub).is_err());
    }

    #[test]
    fn test_validate() {
        let mut s = state_3d();
        assert!(s.validate().is_ok());

        s.P[(0, 1)] += 0.1;
        assert!(s.validate().is_err());

        let mut s = state_3d();
        s.P[(0, 0)] = -4.;
        assert!(s.validate().is_err());

        let mut s = state_3d();
        s.x[0] = f64::NAN;
        assert!(matches!(s.validate(), Err(FilterError::NonFinite { .. })));

        // Semi-definite is fine
        assert!(GaussianState::zeros(3).validate().is_ok());
    }

    #[test]
    fn test_random_draw_statistics() {
        let s = state_3d();
        let mut rng = StdRng::seed_from_u64(42);
        let draws: Vec<DVector<f64>> = (0..20000)
            .map(|_| s.random_draw(&mut rng).unwrap())
            .collect();

        let mean = draws.iter().fold(DVector::zeros(3), |acc, d| acc + d) / draws.len() as f64;
        assert!(mean.relative_eq(&s.x, 0.05, 0.05), "mean = {}", mean);

        let cov = draws
            .iter()
            .map(|d| (d - &mean) * (d - &mean).transpose())
            .fold(DMatrix::zeros(3, 3), |acc, c| acc + c)
            / (draws.len() - 1) as f64;
        assert!(cov.relative_eq(&s.P, 0.15, 0.1), "cov = {}", cov);
    }

    #[test]
    fn test_random_draw_semi_definite() {
        let x = DVector::from_row_slice(&[1., 2.]);
        let P = DMatrix::from_row_slice(2, 2, &[1., 0., 0., 0.]);
        let s = GaussianState::new(x, P).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let draw = s.random_draw(&mut rng).unwrap();
        assert!((draw[1] - 2.).abs() < 1e-12);
    }
}
