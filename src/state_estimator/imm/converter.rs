//! Conversions between the state representations of IMM modes.

use crate::error::{FilterError, Result};
use crate::gaussian::GaussianState;

/// Index of a mode in its IMM bank.
pub type ModelId = usize;

/// Maps states between the representations of the modes of one IMM, and
/// from each mode into the common output representation.
///
/// Conversions are always direct, from one representation to another.
pub trait StateConverter {
    /// Writes `from`, the state of mode `from_id`, into `out` in the
    /// representation of mode `to_id`.
    fn convert(
        &self,
        from: &GaussianState,
        from_id: ModelId,
        to_id: ModelId,
        out: &mut GaussianState,
    ) -> Result<()>;

    /// The state of mode `id` in the output representation.
    fn convert_output(&self, state: &GaussianState, id: ModelId) -> Result<GaussianState>;
}

/// Every mode shares one representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SameDimension;

impl StateConverter for SameDimension {
    fn convert(
        &self,
        from: &GaussianState,
        _from_id: ModelId,
        _to_id: ModelId,
        out: &mut GaussianState,
    ) -> Result<()> {
        out.assign(from)
    }

    fn convert_output(&self, state: &GaussianState, _id: ModelId) -> Result<GaussianState> {
        Ok(state.clone())
    }
}

/// Representations that are prefixes of one another.
///
/// The leading entries shared by both representations are copied, cross terms
/// included. Entries the source lacks are taken from the default state, with
/// zero correlation to the copied block. Without a default, growing a state
/// is a configuration error.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncatingConverter {
    dims: Vec<usize>,
    output_dim: usize,
    default: Option<GaussianState>,
}

impl TruncatingConverter {
    /// `dims[i]` is the state dimension of mode `i`.
    pub fn new(dims: Vec<usize>, output_dim: usize) -> Self {
        TruncatingConverter {
            dims,
            output_dim,
            default: None,
        }
    }

    /// Distribution the missing entries are drawn from when a state grows.
    pub fn with_default(mut self, default: GaussianState) -> Result<Self> {
        let largest = self.dims.iter().copied().fold(self.output_dim, usize::max);
        if default.dim() < largest {
            return Err(FilterError::dimension(largest, default.dim(), "default state"));
        }
        self.default = Some(default);
        Ok(self)
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn dim_of(&self, id: ModelId) -> Result<usize> {
        self.dims.get(id).copied().ok_or_else(|| {
            FilterError::configuration(format!(
                "no mode {} in a converter for {} modes",
                id,
                self.dims.len()
            ))
        })
    }

    fn truncate_into(&self, from: &GaussianState, out: &mut GaussianState) -> Result<()> {
        let (n_from, n_to) = (from.dim(), out.dim());
        let k = n_from.min(n_to);
        out.x.rows_mut(0, k).copy_from(&from.x.rows(0, k));
        out.P.fill(0.0);
        out.P
            .view_mut((0, 0), (k, k))
            .copy_from(&from.P.view((0, 0), (k, k)));

        if n_to > k {
            let default = self.default.as_ref().ok_or_else(|| {
                FilterError::configuration(format!(
                    "growing a state from {} to {} entries needs a default state",
                    n_from, n_to
                ))
            })?;
            let fill = n_to - k;
            out.x.rows_mut(k, fill).copy_from(&default.x.rows(k, fill));
            out.P
                .view_mut((k, k), (fill, fill))
                .copy_from(&default.P.view((k, k), (fill, fill)));
        }
        Ok(())
    }
}

impl StateConverter for TruncatingConverter {
    fn convert(
        &self,
        from: &GaussianState,
        from_id: ModelId,
        to_id: ModelId,
        out: &mut GaussianState,
    ) -> Result<()> {
        let n_from = self.dim_of(from_id)?;
        let n_to = self.dim_of(to_id)?;
        if from.dim() != n_from {
            return Err(FilterError::dimension(n_from, from.dim(), "converted state"));
        }
        if out.dim() != n_to {
            return Err(FilterError::dimension(n_to, out.dim(), "conversion target"));
        }
        self.truncate_into(from, out)
    }

    fn convert_output(&self, state: &GaussianState, id: ModelId) -> Result<GaussianState> {
        let n = self.dim_of(id)?;
        if state.dim() != n {
            return Err(FilterError::dimension(n, state.dim(), "converted state"));
        }
        let mut out = GaussianState::zeros(self.output_dim);
        self.truncate_into(state, &mut out)?;
        Ok(out)
    }
}
