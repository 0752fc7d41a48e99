//! Error types for the filter family

use std::fmt;

/// Broad classes of failure, used by callers to decide how to react.
///
/// Numerical faults mean the track should be discarded and reinitialized,
/// configuration faults are programming errors, and sanity-check failures
/// signal filter divergence without a hard numerical fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Numerical,
    Configuration,
    SanityCheck,
}

/// Errors that can occur while constructing or running a filter
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Matrix inversion or decomposition failed
    SingularMatrix {
        /// Which matrix failed
        context: String,
    },

    /// NaN or infinity found in a result
    NonFinite {
        /// Where the value was found
        context: String,
    },

    /// Covariance lost symmetry or positive semi-definiteness
    NotPositiveSemiDefinite {
        /// Which covariance failed
        context: String,
    },

    /// Dimension mismatch between expected and actual
    DimensionMismatch {
        /// What was expected
        expected: usize,
        /// What was received
        actual: usize,
        /// Context (e.g., "state dimension", "measurement dimension")
        context: String,
    },

    /// Invalid constructor parameters or missing collaborators
    Configuration {
        /// Description of the configuration issue
        description: String,
    },

    /// IMM consistency checks failed
    SanityCheck {
        /// Description of the failed check
        description: String,
    },
}

impl FilterError {
    pub(crate) fn singular(context: impl Into<String>) -> Self {
        FilterError::SingularMatrix {
            context: context.into(),
        }
    }

    pub(crate) fn configuration(description: impl Into<String>) -> Self {
        FilterError::Configuration {
            description: description.into(),
        }
    }

    pub(crate) fn dimension(expected: usize, actual: usize, context: impl Into<String>) -> Self {
        FilterError::DimensionMismatch {
            expected,
            actual,
            context: context.into(),
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FilterError::SingularMatrix { .. }
            | FilterError::NonFinite { .. }
            | FilterError::NotPositiveSemiDefinite { .. } => ErrorKind::Numerical,
            FilterError::DimensionMismatch { .. } | FilterError::Configuration { .. } => {
                ErrorKind::Configuration
            }
            FilterError::SanityCheck { .. } => ErrorKind::SanityCheck,
        }
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::SingularMatrix { context } => {
                write!(f, "Matrix inversion failed: {}", context)
            }
            FilterError::NonFinite { context } => write!(f, "Non-finite value in {}", context),
            FilterError::NotPositiveSemiDefinite { context } => {
                write!(f, "Covariance not symmetric positive semi-definite: {}", context)
            }
            FilterError::DimensionMismatch {
                expected,
                actual,
                context,
            } => write!(
                f,
                "Dimension mismatch for {}: expected {}, got {}",
                context, expected, actual
            ),
            FilterError::Configuration { description } => {
                write!(f, "Configuration error: {}", description)
            }
            FilterError::SanityCheck { description } => {
                write!(f, "Sanity check failed: {}", description)
            }
        }
    }
}

impl std::error::Error for FilterError {}

pub type Result<T> = std::result::Result<T, FilterError>;
