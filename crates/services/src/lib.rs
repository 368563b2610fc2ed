#![forbid(unsafe_code)]

//! Assessment orchestration: the session state machine, the runner that
//! drives it against the backend, and the bridge that feeds asynchronous
//! evaluation verdicts back in from the realtime pipeline.

pub mod api;
pub mod error;
pub mod evaluation;
pub mod runner;
pub mod session;

pub use api::{AssessmentApi, HttpAssessmentApi, StartedInstance, SubmitOutcome};
pub use error::{ApiError, SessionError};
pub use evaluation::EvaluationBridge;
pub use runner::{SessionRunner, SubmitResult};
pub use session::{AssessmentSession, EVALUATION_TIMEOUT_SECS, EvaluationState};
pub use study_core::Clock;
