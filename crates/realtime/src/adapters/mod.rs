//! Process-specific interpreters over the generic job tracker.
//!
//! Each adapter knows one process's payload shape and forwards everything
//! else to the shared `JobObserver` contract.

mod assessment;
mod cardgen;
mod chat;
mod ingestion;

pub use assessment::{AssessmentAdapter, AssessmentObserver};
pub use cardgen::{CardGenAdapter, CardGenObserver};
pub use chat::{ChatAdapter, ChatObserver};
pub use ingestion::IngestionAdapter;
