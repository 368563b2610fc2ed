use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use study_core::model::{
    AnswerValue, AssessmentSlot, Channel, InstanceId, JobId, ReviewPolicy, SessionScore, TestId,
};

use crate::error::ApiError;

//
// ─── RESPONSES ─────────────────────────────────────────────────────────────────
//

/// Server response to starting a test instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedInstance {
    pub instance_id: InstanceId,
    pub questions: Vec<AssessmentSlot>,
    pub review_mode: ReviewPolicy,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resumed: bool,
}

/// Server response to submitting an answer: either an immediate verdict
/// (selection and boolean slots) or a pointer to an asynchronous evaluation
/// job (free-text slots).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SubmitOutcome {
    #[serde(rename_all = "camelCase")]
    Evaluation { job_id: JobId, channel: Channel },
    #[serde(rename_all = "camelCase")]
    Verdict {
        is_correct: bool,
        #[serde(default)]
        correct_value: Option<AnswerValue>,
        #[serde(default)]
        explanation: Option<String>,
    },
}

//
// ─── COLLABORATOR CONTRACT ─────────────────────────────────────────────────────
//

/// External HTTP endpoints consumed by the assessment session machine.
#[async_trait]
pub trait AssessmentApi: Send + Sync {
    /// Start (or resume) an instance of the given test.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport failure or a non-success status.
    async fn start_session(&self, test_id: &TestId) -> Result<StartedInstance, ApiError>;

    /// Submit an answer for one question of the instance.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport failure or a non-success status.
    async fn submit_answer(
        &self,
        instance: &InstanceId,
        question_index: usize,
        value: &AnswerValue,
    ) -> Result<SubmitOutcome, ApiError>;

    /// Finish the instance and fetch its score summary.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on transport failure or a non-success status.
    async fn complete_session(&self, instance: &InstanceId) -> Result<SessionScore, ApiError>;
}

//
// ─── HTTP IMPLEMENTATION ───────────────────────────────────────────────────────
//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitAnswerRequest<'a> {
    question_index: usize,
    value: &'a AnswerValue,
}

/// `AssessmentApi` against the study-assistant backend.
#[derive(Clone)]
pub struct HttpAssessmentApi {
    client: Client,
    base_url: String,
}

impl HttpAssessmentApi {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

#[async_trait]
impl AssessmentApi for HttpAssessmentApi {
    async fn start_session(&self, test_id: &TestId) -> Result<StartedInstance, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("tests/{test_id}/instances")))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()));
        }
        Ok(response.json().await?)
    }

    async fn submit_answer(
        &self,
        instance: &InstanceId,
        question_index: usize,
        value: &AnswerValue,
    ) -> Result<SubmitOutcome, ApiError> {
        let payload = SubmitAnswerRequest {
            question_index,
            value,
        };
        let response = self
            .client
            .post(self.url(&format!("instances/{instance}/answers")))
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()));
        }
        Ok(response.json().await?)
    }

    async fn complete_session(&self, instance: &InstanceId) -> Result<SessionScore, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("instances/{instance}/complete")))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()));
        }
        Ok(response.json().await?)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
