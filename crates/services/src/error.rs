//! Shared error types for the services crate.

use thiserror::Error;

use study_core::model::SlotError;

/// Errors from the external assessment HTTP collaborators.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted by the assessment session machine and runner.
///
/// Illegal navigation is deliberately not represented here: policy
/// violations are silent no-ops, not errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no questions available for session")]
    Empty,

    #[error("no active session")]
    NotStarted,

    #[error("slot {got} appears at position {position}")]
    SlotOrder { position: usize, got: usize },

    #[error("answer value does not fit the slot kind")]
    ValueMismatch,

    #[error("an evaluation is already in flight for slot {0}")]
    EvaluationInFlight(usize),

    #[error("session has unanswered slots")]
    Incomplete,

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error(transparent)]
    Api(#[from] ApiError),
}
