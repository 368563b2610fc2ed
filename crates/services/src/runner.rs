//! Orchestrates one assessment attempt end to end: the HTTP collaborators,
//! the session state machine, and the durable snapshot store.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use storage::snapshot::SnapshotStore;
use study_core::Clock;
use study_core::model::{
    AnswerFeedback, AnswerRecord, AnswerValue, Channel, EvaluationOutcome, InstanceId, JobId,
    SessionId, SessionScore, TestId,
};

use crate::api::{AssessmentApi, StartedInstance, SubmitOutcome};
use crate::error::SessionError;
use crate::session::AssessmentSession;

/// What the submit endpoint handed back for an answer.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitResult {
    /// Graded synchronously; the feedback is already on the record.
    Verdict(AnswerFeedback),
    /// Grading is asynchronous; a verdict will arrive on `channel`.
    EvaluationStarted { job_id: JobId, channel: Channel },
}

/// Drives a single assessment session against its collaborators.
///
/// Every mutation persists a fresh snapshot; a failed API call leaves the
/// session exactly as it was.
pub struct SessionRunner {
    clock: Clock,
    api: Arc<dyn AssessmentApi>,
    store: Arc<dyn SnapshotStore>,
    session: Mutex<Option<AssessmentSession>>,
}

impl SessionRunner {
    #[must_use]
    pub fn new(clock: Clock, api: Arc<dyn AssessmentApi>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            clock,
            api,
            store,
            session: Mutex::new(None),
        }
    }

    //
    // ─── LIFECYCLE ─────────────────────────────────────────────────────────
    //

    /// Start (or resume) an instance of the test. When the snapshot store
    /// holds state for the returned instance, the saved answers and pointer
    /// are merged back in before the first question is shown.
    ///
    /// # Errors
    ///
    /// Propagates API failures and question-list validation errors.
    pub async fn start(&self, test_id: &TestId) -> Result<StartedInstance, SessionError> {
        let started = self.api.start_session(test_id).await?;
        let session_id = SessionId::new(started.instance_id.as_str());
        let mut session = AssessmentSession::new(
            session_id.clone(),
            started.questions.clone(),
            started.review_mode,
        )?;

        if let Some(snapshot) = self.store.load(&session_id) {
            info!(session = %session_id, answers = snapshot.answers.len(), "resuming saved session");
            session.restore(&snapshot);
        }
        self.store.save(&session.snapshot(self.clock.now()));

        *self.session.lock() = Some(session);
        Ok(started)
    }

    /// Finish the session and fetch its score. The snapshot is cleared only
    /// after the completion call succeeds.
    ///
    /// # Errors
    ///
    /// `SessionError::Incomplete` while any slot is unanswered or an
    /// evaluation is still in flight; otherwise propagates API failures.
    pub async fn complete(&self) -> Result<SessionScore, SessionError> {
        let session_id = {
            let guard = self.session.lock();
            let session = guard.as_ref().ok_or(SessionError::NotStarted)?;
            if !session.can_complete() {
                return Err(SessionError::Incomplete);
            }
            session.session_id().clone()
        };

        let instance = InstanceId::new(session_id.as_str());
        let score = self.api.complete_session(&instance).await?;
        self.store.clear(&session_id);
        *self.session.lock() = None;
        Ok(score)
    }

    /// Walk away from the session, discarding its saved state.
    pub fn abandon(&self) {
        if let Some(session) = self.session.lock().take() {
            self.store.clear(session.session_id());
        }
    }

    //
    // ─── ANSWERING ─────────────────────────────────────────────────────────
    //

    /// Submit an answer for one slot.
    ///
    /// The guard runs before the network call, so a rejected value or an
    /// in-flight evaluation never reaches the server. An API failure leaves
    /// the slot unanswered and the pointer where it was.
    ///
    /// # Errors
    ///
    /// `SessionError::ValueMismatch`, `SessionError::EvaluationInFlight`,
    /// or a propagated API failure.
    pub async fn submit_answer(
        &self,
        slot_index: usize,
        value: AnswerValue,
    ) -> Result<SubmitResult, SessionError> {
        let instance = {
            let guard = self.session.lock();
            let session = guard.as_ref().ok_or(SessionError::NotStarted)?;
            session.ensure_can_submit(slot_index, &value)?;
            InstanceId::new(session.session_id().as_str())
        };

        let outcome = self.api.submit_answer(&instance, slot_index, &value).await?;

        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(SessionError::NotStarted)?;
        // Re-check after the await: a concurrent submission for the same slot
        // may have started an evaluation while this call was on the wire, and
        // only one may be in flight per slot. The late result is discarded.
        session.ensure_can_submit(slot_index, &value)?;
        let now = self.clock.now();
        let record = AnswerRecord::new(slot_index, value, now);

        let result = match outcome {
            SubmitOutcome::Verdict {
                is_correct,
                correct_value,
                explanation,
            } => {
                let feedback = AnswerFeedback {
                    is_correct: Some(is_correct),
                    correct_value,
                    explanation,
                    score: None,
                    ai_commentary: None,
                };
                session.record_verdict(record.with_feedback(feedback.clone()));
                SubmitResult::Verdict(feedback)
            }
            SubmitOutcome::Evaluation { job_id, channel } => {
                debug!(slot = slot_index, job = %job_id, "answer accepted for async evaluation");
                session.begin_evaluation(record, job_id.clone(), channel.clone(), now);
                SubmitResult::EvaluationStarted { job_id, channel }
            }
        };

        self.store.save(&session.snapshot(now));
        Ok(result)
    }

    //
    // ─── NAVIGATION ────────────────────────────────────────────────────────
    //

    /// Policy-checked jump to a question. Returns whether the pointer moved;
    /// disallowed moves are silent no-ops.
    pub fn go_to_question(&self, index: usize) -> bool {
        self.navigate(|session| session.go_to_question(index))
    }

    pub fn go_to_next(&self) -> bool {
        self.navigate(AssessmentSession::go_to_next)
    }

    pub fn go_to_previous(&self) -> bool {
        self.navigate(AssessmentSession::go_to_previous)
    }

    fn navigate(&self, step: impl FnOnce(&mut AssessmentSession) -> bool) -> bool {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return false;
        };
        let moved = step(session);
        if moved {
            self.store.save(&session.snapshot(self.clock.now()));
        }
        moved
    }

    //
    // ─── ASYNC EVALUATION ──────────────────────────────────────────────────
    //

    /// Attach a verdict delivered over the realtime channel. Returns false
    /// when the slot has no in-flight evaluation (for instance after a
    /// timeout).
    pub fn apply_evaluation(&self, outcome: EvaluationOutcome) -> bool {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return false;
        };
        let now = self.clock.now();
        let applied = session.resolve_evaluation(outcome, now);
        if applied {
            self.store.save(&session.snapshot(now));
        }
        applied
    }

    /// Mark a slot's evaluation as failed. The answer stays recorded,
    /// ungraded.
    pub fn fail_evaluation(&self, slot_index: usize, message: impl Into<String>) -> bool {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return false;
        };
        let message = message.into();
        let failed = session.fail_evaluation(slot_index, message.clone());
        if failed {
            warn!(slot = slot_index, %message, "answer evaluation failed");
        }
        failed
    }

    /// Give up on a slot's evaluation, whatever its age.
    pub fn force_expire_evaluation(&self, slot_index: usize) -> bool {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return false;
        };
        let expired = session.force_expire_evaluation(slot_index, self.clock.now());
        if expired {
            warn!(slot = slot_index, "answer evaluation timed out");
        }
        expired
    }

    //
    // ─── INSPECTION ────────────────────────────────────────────────────────
    //

    /// Read the live session, if one is active.
    pub fn with_session<R>(&self, read: impl FnOnce(&AssessmentSession) -> R) -> Option<R> {
        self.session.lock().as_ref().map(read)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use storage::snapshot::InMemorySnapshotStore;
    use study_core::model::{AssessmentSlot, InstanceId, ReviewPolicy, SlotKind};
    use study_core::time::{fixed_clock, fixed_now};

    use crate::error::ApiError;

    struct ScriptedApi {
        review_mode: ReviewPolicy,
        questions: Vec<AssessmentSlot>,
        submit: Mutex<Vec<Result<SubmitOutcome, ApiError>>>,
    }

    impl ScriptedApi {
        fn new(review_mode: ReviewPolicy, questions: Vec<AssessmentSlot>) -> Self {
            Self {
                review_mode,
                questions,
                submit: Mutex::new(Vec::new()),
            }
        }

        fn script_submit(&self, outcome: Result<SubmitOutcome, ApiError>) {
            self.submit.lock().push(outcome);
        }
    }

    #[async_trait]
    impl AssessmentApi for ScriptedApi {
        async fn start_session(&self, _test_id: &TestId) -> Result<StartedInstance, ApiError> {
            Ok(StartedInstance {
                instance_id: InstanceId::new("inst-1"),
                questions: self.questions.clone(),
                review_mode: self.review_mode,
                started_at: fixed_now(),
                expires_at: None,
                resumed: false,
            })
        }

        async fn submit_answer(
            &self,
            _instance: &InstanceId,
            _question_index: usize,
            _value: &AnswerValue,
        ) -> Result<SubmitOutcome, ApiError> {
            self.submit.lock().remove(0)
        }

        async fn complete_session(&self, _instance: &InstanceId) -> Result<SessionScore, ApiError> {
            Ok(SessionScore {
                score: 1.0,
                total_questions: self.questions.len(),
                percentage: 100.0,
                evaluating_count: 0,
                completed_at: Utc::now(),
            })
        }
    }

    fn choice_slot(index: usize) -> AssessmentSlot {
        AssessmentSlot::new(
            index,
            SlotKind::SingleSelect,
            format!("Question {index}"),
            vec!["A".into(), "B".into()],
        )
        .unwrap()
    }

    fn free_text_slot(index: usize) -> AssessmentSlot {
        AssessmentSlot::new(index, SlotKind::FreeText, format!("Explain {index}"), vec![])
            .unwrap()
    }

    fn evaluation_pointer() -> SubmitOutcome {
        SubmitOutcome::Evaluation {
            job_id: JobId::new("eval-0"),
            channel: Channel::new("assessment:job:eval-0"),
        }
    }

    fn correct() -> SubmitOutcome {
        SubmitOutcome::Verdict {
            is_correct: true,
            correct_value: None,
            explanation: None,
        }
    }

    fn runner(api: Arc<ScriptedApi>) -> (SessionRunner, Arc<InMemorySnapshotStore>) {
        let store = Arc::new(InMemorySnapshotStore::new());
        (
            SessionRunner::new(fixed_clock(), api, Arc::clone(&store) as Arc<dyn SnapshotStore>),
            store,
        )
    }

    #[tokio::test]
    async fn verdicts_are_recorded_and_persisted() {
        let api = Arc::new(ScriptedApi::new(
            ReviewPolicy::Immediate,
            vec![choice_slot(0), choice_slot(1)],
        ));
        api.script_submit(Ok(correct()));
        let (runner, store) = runner(Arc::clone(&api));

        runner.start(&TestId::new("test-1")).await.unwrap();
        let result = runner
            .submit_answer(0, AnswerValue::Text("A".into()))
            .await
            .unwrap();
        let SubmitResult::Verdict(feedback) = result else {
            panic!("expected a verdict");
        };
        assert_eq!(feedback.is_correct, Some(true));

        let saved = store.load(&SessionId::new("inst-1")).unwrap();
        assert_eq!(saved.answers.len(), 1);
    }

    #[tokio::test]
    async fn failed_submit_leaves_the_slot_unanswered() {
        let api = Arc::new(ScriptedApi::new(
            ReviewPolicy::Immediate,
            vec![choice_slot(0), choice_slot(1)],
        ));
        api.script_submit(Err(ApiError::HttpStatus(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        )));
        let (runner, _store) = runner(Arc::clone(&api));
        runner.start(&TestId::new("test-1")).await.unwrap();

        let err = runner.submit_answer(0, AnswerValue::Text("A".into())).await;
        assert!(matches!(err.unwrap_err(), SessionError::Api(_)));

        runner
            .with_session(|session| {
                assert!(session.answer(0).is_none());
                assert_eq!(session.current_slot_index(), 0);
            })
            .unwrap();
        // forward navigation stays blocked, exactly as before the attempt
        assert!(!runner.go_to_next());
    }

    #[tokio::test]
    async fn complete_requires_all_answers_then_clears_the_store() {
        let api = Arc::new(ScriptedApi::new(
            ReviewPolicy::Deferred,
            vec![choice_slot(0), choice_slot(1)],
        ));
        api.script_submit(Ok(correct()));
        api.script_submit(Ok(correct()));
        let (runner, store) = runner(Arc::clone(&api));
        runner.start(&TestId::new("test-1")).await.unwrap();

        let err = runner.complete().await;
        assert!(matches!(err.unwrap_err(), SessionError::Incomplete));

        runner.submit_answer(0, AnswerValue::Text("A".into())).await.unwrap();
        runner.submit_answer(1, AnswerValue::Text("B".into())).await.unwrap();

        let score = runner.complete().await.unwrap();
        assert_eq!(score.total_questions, 2);
        assert!(store.load(&SessionId::new("inst-1")).is_none());
        assert!(runner.with_session(|_| ()).is_none());
    }

    #[tokio::test]
    async fn complete_succeeds_while_an_evaluation_is_pending() {
        let api = Arc::new(ScriptedApi::new(
            ReviewPolicy::Deferred,
            vec![choice_slot(0), free_text_slot(1)],
        ));
        api.script_submit(Ok(correct()));
        api.script_submit(Ok(evaluation_pointer()));
        let (runner, store) = runner(Arc::clone(&api));
        runner.start(&TestId::new("test-1")).await.unwrap();

        runner.submit_answer(0, AnswerValue::Text("A".into())).await.unwrap();
        let result = runner
            .submit_answer(1, AnswerValue::Text("because of lifetimes".into()))
            .await
            .unwrap();
        assert!(matches!(result, SubmitResult::EvaluationStarted { .. }));

        // every slot is answered; pending grading does not block completion
        let score = runner.complete().await.unwrap();
        assert_eq!(score.total_questions, 2);
        assert!(store.load(&SessionId::new("inst-1")).is_none());
    }

    #[tokio::test]
    async fn concurrent_submissions_for_one_slot_start_a_single_evaluation() {
        struct GatedApi {
            barrier: tokio::sync::Barrier,
        }

        #[async_trait]
        impl AssessmentApi for GatedApi {
            async fn start_session(&self, _test_id: &TestId) -> Result<StartedInstance, ApiError> {
                Ok(StartedInstance {
                    instance_id: InstanceId::new("inst-1"),
                    questions: vec![free_text_slot(0)],
                    review_mode: ReviewPolicy::Immediate,
                    started_at: fixed_now(),
                    expires_at: None,
                    resumed: false,
                })
            }

            async fn submit_answer(
                &self,
                _instance: &InstanceId,
                _question_index: usize,
                _value: &AnswerValue,
            ) -> Result<SubmitOutcome, ApiError> {
                // hold both submissions on the wire at the same time
                let _ = self.barrier.wait().await;
                Ok(evaluation_pointer())
            }

            async fn complete_session(
                &self,
                _instance: &InstanceId,
            ) -> Result<SessionScore, ApiError> {
                unimplemented!("not exercised here")
            }
        }

        let api = Arc::new(GatedApi {
            barrier: tokio::sync::Barrier::new(2),
        });
        let store = Arc::new(InMemorySnapshotStore::new());
        let runner = Arc::new(SessionRunner::new(
            fixed_clock(),
            api,
            store as Arc<dyn SnapshotStore>,
        ));
        runner.start(&TestId::new("test-1")).await.unwrap();

        let (first, second) = tokio::join!(
            runner.submit_answer(0, AnswerValue::Text("first draft".into())),
            runner.submit_answer(0, AnswerValue::Text("second draft".into())),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(SessionError::EvaluationInFlight(0))))
        );
        runner
            .with_session(|session| {
                assert!(session.evaluation(0).unwrap().is_in_flight());
                assert!(session.answer(0).is_some());
            })
            .unwrap();
    }

    #[tokio::test]
    async fn start_resumes_from_a_saved_snapshot() {
        let api = Arc::new(ScriptedApi::new(
            ReviewPolicy::Deferred,
            vec![choice_slot(0), choice_slot(1), choice_slot(2)],
        ));
        api.script_submit(Ok(correct()));
        let (first, store) = runner(Arc::clone(&api));
        first.start(&TestId::new("test-1")).await.unwrap();
        first.submit_answer(0, AnswerValue::Text("A".into())).await.unwrap();
        first.go_to_question(2);

        // same store, fresh runner: simulates a reload
        let second = SessionRunner::new(
            fixed_clock(),
            Arc::clone(&api) as Arc<dyn AssessmentApi>,
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
        );
        second.start(&TestId::new("test-1")).await.unwrap();
        second
            .with_session(|session| {
                assert_eq!(session.answered_count(), 1);
                assert_eq!(session.current_slot_index(), 2);
            })
            .unwrap();
    }

    #[tokio::test]
    async fn abandon_discards_saved_state() {
        let api = Arc::new(ScriptedApi::new(
            ReviewPolicy::Deferred,
            vec![choice_slot(0)],
        ));
        let (runner, store) = runner(Arc::clone(&api));
        runner.start(&TestId::new("test-1")).await.unwrap();
        assert!(store.load(&SessionId::new("inst-1")).is_some());

        runner.abandon();
        assert!(store.load(&SessionId::new("inst-1")).is_none());
        assert!(!runner.go_to_next());
    }
}
