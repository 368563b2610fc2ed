use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

//
// ─── EVENT ENVELOPE ────────────────────────────────────────────────────────────
//

/// Category of asynchronous backend job carried on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Process {
    Ingestion,
    Chat,
    CardGen,
    Assessment,
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Process::Ingestion => "ingestion",
            Process::Chat => "chat",
            Process::CardGen => "cardgen",
            Process::Assessment => "assessment",
        };
        write!(f, "{name}")
    }
}

/// Wire tag of a job event. Tags not in this set deserialize as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventType {
    Started,
    Extracting,
    GeneratingContext,
    GeneratingSummary,
    Generating,
    Chunk,
    AnswerEvaluated,
    Complete,
    Error,
    #[serde(other)]
    Unknown,
}

impl JobEventType {
    /// Status this event tag maps to, independent of process.
    #[must_use]
    pub fn status(self) -> JobStatus {
        match self {
            JobEventType::Started => JobStatus::Started,
            JobEventType::Extracting
            | JobEventType::GeneratingContext
            | JobEventType::GeneratingSummary
            | JobEventType::Generating
            | JobEventType::Chunk => JobStatus::Processing,
            JobEventType::Complete => JobStatus::Complete,
            JobEventType::Error => JobStatus::Error,
            JobEventType::AnswerEvaluated | JobEventType::Unknown => JobStatus::Pending,
        }
    }

    /// Fixed, process-independent progress heuristic for this tag.
    #[must_use]
    pub fn progress_heuristic(self) -> u8 {
        match self {
            JobEventType::Started => 5,
            JobEventType::Extracting => 20,
            JobEventType::GeneratingContext => 30,
            JobEventType::GeneratingSummary => 60,
            JobEventType::Generating | JobEventType::Chunk => 50,
            JobEventType::Complete => 100,
            JobEventType::Error => 0,
            JobEventType::AnswerEvaluated | JobEventType::Unknown => 10,
        }
    }

    /// True for the tags that map to `JobStatus::Processing`.
    #[must_use]
    pub fn is_processing(self) -> bool {
        self.status() == JobStatus::Processing
    }
}

/// One event published on a channel.
///
/// Process-specific fields (chat `content`, assessment `questionIndex` and
/// friends) stay in `payload` so adapters can pull them out without the
/// envelope failing on shapes it does not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub process: Process,
    #[serde(rename = "type")]
    pub event_type: JobEventType,
    #[serde(default)]
    pub job_id: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl JobEvent {
    #[must_use]
    pub fn new(process: Process, event_type: JobEventType) -> Self {
        Self {
            process,
            event_type,
            job_id: String::new(),
            payload: Map::new(),
        }
    }

    #[must_use]
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        let _ = self.payload.insert(key.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Incremental chat content, present on `chunk` events.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.str_field("content")
    }

    /// Error text from the `message` or `error` payload field.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.str_field("message").or_else(|| self.str_field("error"))
    }
}

//
// ─── DERIVED SUBSCRIPTION STATE ────────────────────────────────────────────────
//

/// Uniform status of one tracked job, derived from its event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Started,
    Processing,
    Complete,
    Error,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Started => "started",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Derived `{status, progress, error}` tuple for one subscription.
///
/// Progress is monotonically non-decreasing for the lifetime of the
/// subscription: each event contributes `max(previous, heuristic)`, so an
/// `error` event (heuristic 0) keeps the last-seen value and the UI never
/// regresses. A `complete` event pins progress at exactly 100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobSubscriptionState {
    status: JobStatus,
    progress: u8,
    error: Option<String>,
    last_event_type: Option<JobEventType>,
}

impl JobSubscriptionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Derived progress, 0..=100.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn last_event_type(&self) -> Option<JobEventType> {
        self.last_event_type
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Complete | JobStatus::Error)
    }

    /// Fold one event into the derived state.
    pub fn apply(&mut self, event: &JobEvent) {
        let kind = event.event_type;
        self.status = kind.status();
        self.progress = self.progress.max(kind.progress_heuristic());
        if kind == JobEventType::Complete {
            self.progress = 100;
        }
        if kind == JobEventType::Error {
            self.error = Some(
                event
                    .error_message()
                    .unwrap_or("job reported an error")
                    .to_owned(),
            );
        }
        self.last_event_type = Some(kind);
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
