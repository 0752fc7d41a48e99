//! Gaussian mixtures and their moment-matched reduction

use crate::error::{FilterError, Result};
use crate::gaussian::GaussianState;
use nalgebra::DMatrix;

/// Weighted components. Weights are expected to sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureParameters<T> {
    pub weights: Vec<f64>,
    pub components: Vec<T>,
}

impl<T> MixtureParameters<T> {
    pub fn new(weights: Vec<f64>, components: Vec<T>) -> Result<Self> {
        if weights.len() != components.len() {
            return Err(FilterError::dimension(
                components.len(),
                weights.len(),
                "mixture weights",
            ));
        }
        Ok(MixtureParameters {
            weights,
            components,
        })
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&f64, &T)> {
        self.weights.iter().zip(self.components.iter())
    }

    pub fn destructure(self) -> (Vec<f64>, Vec<T>) {
        (self.weights, self.components)
    }
}

impl MixtureParameters<GaussianState> {
    /// See [`reduce_mixture`].
    pub fn reduce(&self) -> Result<GaussianState> {
        reduce_mixture(&self.weights, &self.components)
    }
}

/// Approximates a Gaussian mixture by a single Gaussian with the same first
/// two moments:
///
/// ```text
/// x̄ = Σ wᵢ·xᵢ
/// P̄ = Σ wᵢ·[Pᵢ + (xᵢ − x̄)(xᵢ − x̄)ᵗ]
/// ```
pub fn reduce_mixture(weights: &[f64], components: &[GaussianState]) -> Result<GaussianState> {
    let n = match components.first() {
        Some(first) => first.dim(),
        None => return Err(FilterError::configuration("cannot reduce an empty mixture")),
    };
    let mut reduced = GaussianState::zeros(n);
    reduce_mixture_into(weights, components.iter(), &mut reduced)?;
    Ok(reduced)
}

/// [`reduce_mixture`] written into an existing state of the right dimension.
pub fn reduce_mixture_into<'a, I>(weights: &[f64], components: I, out: &mut GaussianState) -> Result<()>
where
    I: IntoIterator<Item = &'a GaussianState> + Clone,
{
    let n = out.dim();
    let mut count = 0;
    out.x.fill(0.0);
    for (w, c) in weights.iter().zip(components.clone()) {
        if c.dim() != n {
            return Err(FilterError::dimension(n, c.dim(), "mixture component"));
        }
        out.x.axpy(*w, &c.x, 1.0);
        count += 1;
    }
    if count != weights.len() {
        return Err(FilterError::dimension(weights.len(), count, "mixture components"));
    }

    out.P.fill(0.0);
    let mut dx = out.x.clone();
    for (w, c) in weights.iter().zip(components) {
        dx.copy_from(&c.x);
        dx -= &out.x;
        out.P.zip_apply(&c.P, |p, cp| *p += w * cp);
        out.P.ger(*w, &dx, &dx, 1.0);
    }
    Ok(())
}

/// Bayes over a Markov chain.
///
/// `transition[(j, i)]` is the probability of moving from mode `j` to mode
/// `i`. Returns the predicted probabilities `μ̄ᵢ = Σⱼ πⱼᵢ·μⱼ` and the mixing
/// weights `c[(i, j)] = πⱼᵢ·μⱼ / μ̄ᵢ`, one row per target mode. A target mode
/// with zero predicted probability keeps its own state (identity row).
pub fn discrete_bayes(prior: &[f64], transition: &DMatrix<f64>) -> Result<(Vec<f64>, DMatrix<f64>)> {
    let n = prior.len();
    if transition.shape() != (n, n) {
        return Err(FilterError::dimension(n, transition.nrows(), "transition matrix"));
    }
    // joint[(j, i)] = P(from j, to i)
    let joint = DMatrix::from_fn(n, n, |j, i| transition[(j, i)] * prior[j]);
    let predicted: Vec<f64> = joint.column_iter().map(|c| c.sum()).collect();
    let mixing = DMatrix::from_fn(n, n, |i, j| {
        if predicted[i] > 0.0 {
            joint[(j, i)] / predicted[i]
        } else if i == j {
            1.0
        } else {
            0.0
        }
    });
    Ok((predicted, mixing))
}
