//! Library error type.

use thiserror::Error;

/// Errors raised by calibration and reconstruction routines.
///
/// Parameter-consistency failures are terminal: callers are expected to fix
/// the inputs and re-run, nothing is retried internally.
#[derive(Debug, Error)]
pub enum ChromaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Two arrays (or an array and a parameter) disagree in size.
    #[error("dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: String,
        got: String,
    },

    /// A configuration value is out of range or a combination is not allowed.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Too few samples to determine the requested model.
    #[error("insufficient data: need {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// A linear solve or decomposition failed.
    #[error("numerical failure: {0}")]
    Numerical(String),
}

impl ChromaError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub(crate) fn mismatch(
        what: &'static str,
        expected: impl std::fmt::Debug,
        got: impl std::fmt::Debug,
    ) -> Self {
        Self::DimensionMismatch {
            what,
            expected: format!("{expected:?}"),
            got: format!("{got:?}"),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ChromaError>;
