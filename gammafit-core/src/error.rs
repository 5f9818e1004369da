//! Errors raised while building and fitting models.

use gammafit_linalg::LinalgError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error(transparent)]
    Linalg(#[from] LinalgError),

    #[error("Unknown model type \"{0}\"")]
    UnknownModel(String),

    #[error("Unknown parameter \"{0}\"")]
    UnknownParameter(String),

    #[error("Invalid parameter \"{name}\": {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("No free parameters to fit")]
    NoFreeParameters,

    #[error("Objective function is not finite ({0})")]
    NonFiniteObjective(f64),

    #[error("Feature not implemented: {0}")]
    FeatureNotImplemented(&'static str),
}

impl FitError {
    /// Factorisation failures the optimizer treats as a rejected step.
    pub fn is_numerical_failure(&self) -> bool {
        matches!(self, FitError::Linalg(e) if e.is_numerical_failure())
    }

    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        FitError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FitError>;
