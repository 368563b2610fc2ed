use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::SessionId;

//
// ─── SLOTS ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SlotError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("selection slots need at least one choice")]
    MissingChoices,
}

/// Question shape of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotKind {
    SingleSelect,
    MultiSelect,
    Boolean,
    FreeText,
}

impl SlotKind {
    /// True for kinds that present a fixed choice list.
    #[must_use]
    pub fn has_choices(self) -> bool {
        matches!(self, SlotKind::SingleSelect | SlotKind::MultiSelect)
    }

    /// True for kinds graded synchronously by the submit endpoint.
    #[must_use]
    pub fn grades_synchronously(self) -> bool {
        self != SlotKind::FreeText
    }
}

/// One question position within an assessment session. Immutable once the
/// session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentSlot {
    index: usize,
    kind: SlotKind,
    prompt: String,
    #[serde(default)]
    choices: Vec<String>,
}

impl AssessmentSlot {
    /// Build a validated slot.
    ///
    /// # Errors
    ///
    /// Returns `SlotError::EmptyPrompt` for a blank prompt, or
    /// `SlotError::MissingChoices` when a selection kind has no choices.
    pub fn new(
        index: usize,
        kind: SlotKind,
        prompt: impl Into<String>,
        choices: Vec<String>,
    ) -> Result<Self, SlotError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(SlotError::EmptyPrompt);
        }
        if kind.has_choices() && choices.is_empty() {
            return Err(SlotError::MissingChoices);
        }

        Ok(Self {
            index,
            kind,
            prompt,
            choices,
        })
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn choices(&self) -> &[String] {
        &self.choices
    }
}

//
// ─── ANSWERS ───────────────────────────────────────────────────────────────────
//

/// A submitted answer value, mirroring the wire shape
/// (`string | string[] | boolean`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Boolean(bool),
    Text(String),
    Selection(Vec<String>),
}

impl AnswerValue {
    /// Whether this value shape is valid for the given slot kind.
    #[must_use]
    pub fn matches(&self, kind: SlotKind) -> bool {
        matches!(
            (self, kind),
            (AnswerValue::Boolean(_), SlotKind::Boolean)
                | (AnswerValue::Text(_), SlotKind::SingleSelect | SlotKind::FreeText)
                | (AnswerValue::Selection(_), SlotKind::MultiSelect)
        )
    }
}

/// Grading detail attached to an answered slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AnswerFeedback {
    pub is_correct: Option<bool>,
    pub correct_value: Option<AnswerValue>,
    pub explanation: Option<String>,
    pub score: Option<f64>,
    pub ai_commentary: Option<String>,
}

/// The answer stored for one slot. At most one record exists per slot index;
/// re-answering overwrites the prior record and refreshes `answered_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub slot_index: usize,
    pub value: AnswerValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<AnswerFeedback>,
    pub answered_at: DateTime<Utc>,
}

impl AnswerRecord {
    #[must_use]
    pub fn new(slot_index: usize, value: AnswerValue, answered_at: DateTime<Utc>) -> Self {
        Self {
            slot_index,
            value,
            feedback: None,
            answered_at,
        }
    }

    #[must_use]
    pub fn with_feedback(mut self, feedback: AnswerFeedback) -> Self {
        self.feedback = Some(feedback);
        self
    }
}

//
// ─── SESSION SNAPSHOT & POLICY ─────────────────────────────────────────────────
//

/// Durable serialization of a session's navigation pointer and answers,
/// written after every mutation and used to resume after a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub current_slot_index: usize,
    pub answers: Vec<AnswerRecord>,
    pub saved_at: DateTime<Utc>,
}

/// How feedback and navigation behave during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewPolicy {
    /// Per-answer feedback; forward navigation gated on the current slot
    /// being answered.
    Immediate,
    /// No per-answer feedback; free navigation; grading at completion.
    Deferred,
}

/// Completion summary returned by the external completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionScore {
    pub score: f64,
    pub total_questions: usize,
    pub percentage: f64,
    #[serde(default)]
    pub evaluating_count: usize,
    pub completed_at: DateTime<Utc>,
}

//
// ─── ASYNC EVALUATION ──────────────────────────────────────────────────────────
//

/// Verdict extracted from an `answer_evaluated` event.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub question_index: usize,
    pub score: Option<f64>,
    pub is_correct: Option<bool>,
    pub feedback: Option<String>,
}

impl EvaluationOutcome {
    /// Convert the outcome into the feedback shape stored on an answer.
    #[must_use]
    pub fn into_feedback(self) -> AnswerFeedback {
        AnswerFeedback {
            is_correct: self.is_correct,
            correct_value: None,
            explanation: None,
            score: self.score,
            ai_commentary: self.feedback,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
