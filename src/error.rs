//! User-visible error taxonomy for the valuation flow
//!
//! Only these four variants ever reach the frontend. Malformed payload shapes
//! are not errors at all: the normalizer absorbs them and returns a degraded
//! report instead.

use thiserror::Error;

/// Fallback when the external system reports failure without a message
pub const GENERIC_FAILURE_MESSAGE: &str = "The valuation could not be completed";

#[derive(Debug, Error)]
pub enum ValuationError {
    /// Submission or poll failed at the network level. Retryable by the
    /// caller, never retried automatically.
    #[error("request to valuation service failed: {0}")]
    Transport(String),

    /// Business-rule rejection with its own modal flow, never retried
    #[error("free trial limit reached")]
    TrialLimit { display_name: String },

    /// Polling exceeded the ceiling; polling stops permanently for the job
    #[error("valuation is taking longer than expected")]
    Timeout,

    /// The external system explicitly reported failure
    #[error("valuation failed: {0}")]
    JobFailed(String),
}

impl ValuationError {
    /// Wire error code used in `ErrorResponse` replies
    pub fn code(&self) -> &'static str {
        match self {
            ValuationError::Transport(_) => "TRANSPORT_ERROR",
            ValuationError::TrialLimit { .. } => "TRIAL_LIMIT_REACHED",
            ValuationError::Timeout => "TIMEOUT",
            ValuationError::JobFailed(_) => "JOB_FAILED",
        }
    }

    /// Build a `JobFailed` from whatever error text the producer supplied
    pub fn job_failed(message: Option<String>) -> Self {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());
        ValuationError::JobFailed(message)
    }
}

impl From<reqwest::Error> for ValuationError {
    fn from(err: reqwest::Error) -> Self {
        ValuationError::Transport(err.to_string())
    }
}
