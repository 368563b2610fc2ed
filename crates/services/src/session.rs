//! The assessment session state machine.
//!
//! Pure state: no I/O, no clocks of its own. The runner owns the `Clock`
//! and the collaborators; this type owns the navigation, answer, and
//! evaluation bookkeeping rules.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use study_core::model::{
    AnswerRecord, AnswerValue, AssessmentSlot, Channel, EvaluationOutcome, JobId, ReviewPolicy,
    SessionId, SessionSnapshot,
};

use crate::error::SessionError;

/// How long an in-flight evaluation may go without a verdict before the
/// session gives up on it.
pub const EVALUATION_TIMEOUT_SECS: i64 = 30;

//
// ─── EVALUATION BOOKKEEPING ────────────────────────────────────────────────────
//

/// Lifecycle of one asynchronous free-text evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationState {
    /// Submitted and awaiting a verdict over the realtime channel.
    InFlight {
        job_id: JobId,
        channel: Channel,
        started_at: DateTime<Utc>,
    },
    /// Gave up waiting. Terminal: a verdict arriving later is discarded.
    TimedOut { at: DateTime<Utc> },
    /// The evaluation job reported an error. Terminal.
    Failed { message: String },
}

impl EvaluationState {
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, EvaluationState::InFlight { .. })
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One in-progress assessment attempt.
///
/// Answers are keyed by slot index; re-answering overwrites. Navigation is
/// policy-checked and illegal moves are silent no-ops.
#[derive(Debug)]
pub struct AssessmentSession {
    session_id: SessionId,
    slots: Vec<AssessmentSlot>,
    review_policy: ReviewPolicy,
    answers: BTreeMap<usize, AnswerRecord>,
    current_slot_index: usize,
    evaluations: BTreeMap<usize, EvaluationState>,
}

impl AssessmentSession {
    /// Build a session from the server's question list.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Empty` for an empty question list, or
    /// `SessionError::SlotOrder` when slot indices do not match their
    /// positions.
    pub fn new(
        session_id: SessionId,
        slots: Vec<AssessmentSlot>,
        review_policy: ReviewPolicy,
    ) -> Result<Self, SessionError> {
        if slots.is_empty() {
            return Err(SessionError::Empty);
        }
        for (position, slot) in slots.iter().enumerate() {
            if slot.index() != position {
                return Err(SessionError::SlotOrder {
                    position,
                    got: slot.index(),
                });
            }
        }

        Ok(Self {
            session_id,
            slots,
            review_policy,
            answers: BTreeMap::new(),
            current_slot_index: 0,
            evaluations: BTreeMap::new(),
        })
    }

    //
    // ─── ACCESSORS ─────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn slots(&self) -> &[AssessmentSlot] {
        &self.slots
    }

    #[must_use]
    pub fn review_policy(&self) -> ReviewPolicy {
        self.review_policy
    }

    #[must_use]
    pub fn current_slot_index(&self) -> usize {
        self.current_slot_index
    }

    #[must_use]
    pub fn current_slot(&self) -> &AssessmentSlot {
        &self.slots[self.current_slot_index]
    }

    #[must_use]
    pub fn answer(&self, slot_index: usize) -> Option<&AnswerRecord> {
        self.answers.get(&slot_index)
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    #[must_use]
    pub fn evaluation(&self, slot_index: usize) -> Option<&EvaluationState> {
        self.evaluations.get(&slot_index)
    }

    /// Lowest-indexed slot without an answer, if any.
    #[must_use]
    pub fn first_unanswered(&self) -> Option<usize> {
        (0..self.slots.len()).find(|index| !self.answers.contains_key(index))
    }

    /// True once every slot has an answer. An answered free-text slot whose
    /// grading is still pending counts: the completion summary reports such
    /// slots through its `evaluating_count`.
    #[must_use]
    pub fn can_complete(&self) -> bool {
        self.first_unanswered().is_none()
    }

    //
    // ─── SNAPSHOTS ─────────────────────────────────────────────────────────
    //

    /// Serialize the pointer and answers for durable storage. In-flight
    /// evaluations are deliberately not captured; a restored session starts
    /// with no evaluation state.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            current_slot_index: self.current_slot_index,
            answers: self.answers.values().cloned().collect(),
            saved_at: now,
        }
    }

    /// Merge a saved snapshot into a freshly started session. Answers for
    /// unknown slot indices are dropped and the pointer is clamped to the
    /// question list.
    pub fn restore(&mut self, snapshot: &SessionSnapshot) {
        for record in &snapshot.answers {
            if record.slot_index >= self.slots.len() {
                debug!(
                    session = %self.session_id,
                    slot = record.slot_index,
                    "dropping saved answer for a slot this session does not have"
                );
                continue;
            }
            self.answers.insert(record.slot_index, record.clone());
        }
        self.current_slot_index = snapshot.current_slot_index.min(self.slots.len() - 1);
    }

    //
    // ─── ANSWERING ─────────────────────────────────────────────────────────
    //

    /// Check that `value` may be submitted for `slot_index` right now.
    ///
    /// # Errors
    ///
    /// `SessionError::ValueMismatch` when the value shape does not fit the
    /// slot kind, or `SessionError::EvaluationInFlight` while a prior
    /// submission for the slot is still being graded.
    pub fn ensure_can_submit(
        &self,
        slot_index: usize,
        value: &AnswerValue,
    ) -> Result<(), SessionError> {
        let Some(slot) = self.slots.get(slot_index) else {
            return Err(SessionError::SlotOrder {
                position: self.slots.len(),
                got: slot_index,
            });
        };
        if !value.matches(slot.kind()) {
            return Err(SessionError::ValueMismatch);
        }
        if self
            .evaluations
            .get(&slot_index)
            .is_some_and(EvaluationState::is_in_flight)
        {
            return Err(SessionError::EvaluationInFlight(slot_index));
        }
        Ok(())
    }

    /// Store a graded answer. Overwrites any prior record for the slot and
    /// clears stale evaluation state left by an earlier attempt.
    pub fn record_verdict(&mut self, record: AnswerRecord) {
        self.evaluations.remove(&record.slot_index);
        self.answers.insert(record.slot_index, record);
    }

    /// Store an ungraded answer and mark its evaluation as in flight.
    pub fn begin_evaluation(
        &mut self,
        record: AnswerRecord,
        job_id: JobId,
        channel: Channel,
        now: DateTime<Utc>,
    ) {
        let slot_index = record.slot_index;
        self.answers.insert(slot_index, record);
        self.evaluations.insert(
            slot_index,
            EvaluationState::InFlight {
                job_id,
                channel,
                started_at: now,
            },
        );
    }

    /// Attach a verdict to the slot's pending answer. Returns false when no
    /// evaluation is in flight for the slot (late verdicts after a timeout
    /// or failure are discarded).
    pub fn resolve_evaluation(&mut self, outcome: EvaluationOutcome, now: DateTime<Utc>) -> bool {
        let slot_index = outcome.question_index;
        if !self
            .evaluations
            .get(&slot_index)
            .is_some_and(EvaluationState::is_in_flight)
        {
            debug!(
                session = %self.session_id,
                slot = slot_index,
                "discarding verdict with no in-flight evaluation"
            );
            return false;
        }
        let Some(record) = self.answers.get_mut(&slot_index) else {
            return false;
        };
        record.feedback = Some(outcome.into_feedback());
        record.answered_at = now;
        self.evaluations.remove(&slot_index);
        true
    }

    /// Mark the slot's evaluation as failed. Returns false when no
    /// evaluation is in flight. The answer itself stays recorded, ungraded.
    pub fn fail_evaluation(&mut self, slot_index: usize, message: impl Into<String>) -> bool {
        if !self
            .evaluations
            .get(&slot_index)
            .is_some_and(EvaluationState::is_in_flight)
        {
            return false;
        }
        self.evaluations.insert(
            slot_index,
            EvaluationState::Failed {
                message: message.into(),
            },
        );
        true
    }

    /// Give up on the slot's evaluation regardless of how long it has been
    /// in flight. Returns false when none is in flight.
    pub fn force_expire_evaluation(&mut self, slot_index: usize, now: DateTime<Utc>) -> bool {
        if !self
            .evaluations
            .get(&slot_index)
            .is_some_and(EvaluationState::is_in_flight)
        {
            return false;
        }
        self.evaluations
            .insert(slot_index, EvaluationState::TimedOut { at: now });
        true
    }

    //
    // ─── NAVIGATION ────────────────────────────────────────────────────────
    //

    /// Move the pointer to `index` when the review policy allows it.
    /// Returns whether the pointer moved. Out-of-policy and out-of-range
    /// targets are silent no-ops.
    pub fn go_to_question(&mut self, index: usize) -> bool {
        if index >= self.slots.len() || index == self.current_slot_index {
            return false;
        }
        let allowed = match self.review_policy {
            ReviewPolicy::Deferred => true,
            ReviewPolicy::Immediate => {
                let target_answered = self.answers.contains_key(&index);
                let current_answered = self.answers.contains_key(&self.current_slot_index);
                // Forward progress in immediate mode is exactly one slot: the
                // lowest-indexed unanswered question, and only once the
                // current one is answered.
                target_answered
                    || (current_answered && Some(index) == self.first_unanswered())
            }
        };
        if allowed {
            self.current_slot_index = index;
        }
        allowed
    }

    pub fn go_to_next(&mut self) -> bool {
        self.go_to_question(self.current_slot_index + 1)
    }

    pub fn go_to_previous(&mut self) -> bool {
        match self.current_slot_index.checked_sub(1) {
            Some(previous) => self.go_to_question(previous),
            None => false,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
