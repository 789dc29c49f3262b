//! Action-level error type.

use thiserror::Error;

/// Errors returned by an executor's `execute` method.
///
/// The orchestrator uses the variant to decide retry behaviour:
/// - `Retryable`: re-run with back-off, bounded by the workflow's retry policy.
/// - anything else: the task fails and so does its stage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// A required parameter is absent or empty.
    #[error("{action} action requires parameter '{parameter}'")]
    MissingParameter { action: String, parameter: String },

    /// A parameter is present but has the wrong shape.
    #[error("{action} action parameter '{parameter}' is invalid: {reason}")]
    InvalidParameter {
        action: String,
        parameter: String,
        reason: String,
    },

    /// Unknown sub-action (e.g. `task` with `action: archive`).
    #[error("unsupported {action} operation '{operation}'")]
    Unsupported { action: String, operation: String },

    /// Transient failure; the caller may retry.
    #[error("retryable action error: {0}")]
    Retryable(String),

    /// Permanent failure.
    #[error("fatal action error: {0}")]
    Fatal(String),
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
