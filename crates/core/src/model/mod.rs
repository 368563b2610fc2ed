mod assessment;
mod ids;
mod job;

pub use assessment::{
    AnswerFeedback, AnswerRecord, AnswerValue, AssessmentSlot, EvaluationOutcome, ReviewPolicy,
    SessionScore, SessionSnapshot, SlotError, SlotKind,
};
pub use ids::{Channel, InstanceId, JobId, SessionId, TestId};
pub use job::{JobEvent, JobEventType, JobStatus, JobSubscriptionState, Process};
