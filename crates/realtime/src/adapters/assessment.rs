use serde_json::Value;
use tracing::debug;

use study_core::model::{
    EvaluationOutcome, JobEvent, JobEventType, JobSubscriptionState, Process,
};

use crate::tracker::{JobObserver, JobTracker};

/// Assessment-evaluation callbacks, on top of the generic job contract.
pub trait AssessmentObserver: JobObserver {
    /// The buffered evaluation verdict, delivered once the job's terminal
    /// `complete` has also been observed. Fires at most once.
    fn on_evaluated(&self, outcome: &EvaluationOutcome, state: &JobSubscriptionState) {
        let _ = (outcome, state);
    }
}

/// Interprets asynchronous answer grading.
///
/// The evaluation payload (`answer_evaluated`) and the terminal signal
/// (`complete`) are not guaranteed to arrive in the same event or order, so
/// the last verdict is buffered and the consumer callback fires only once
/// both have been seen.
pub struct AssessmentAdapter {
    tracker: JobTracker,
    buffered: Option<EvaluationOutcome>,
    completed: bool,
    delivered: bool,
}

impl AssessmentAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracker: JobTracker::new(Process::Assessment),
            buffered: None,
            completed: false,
            delivered: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> &JobSubscriptionState {
        self.tracker.state()
    }

    /// The last evaluation verdict seen, delivered or not.
    #[must_use]
    pub fn buffered_outcome(&self) -> Option<&EvaluationOutcome> {
        self.buffered.as_ref()
    }

    pub fn handle(&mut self, event: &JobEvent, observer: &dyn AssessmentObserver) {
        if event.process == Process::Assessment
            && event.event_type == JobEventType::AnswerEvaluated
        {
            match parse_outcome(event) {
                Some(outcome) => self.buffered = Some(outcome),
                None => debug!(job = %event.job_id, "evaluation event without a question index"),
            }
        }

        self.tracker.apply(event, observer as &dyn JobObserver);

        if event.process == Process::Assessment && event.event_type == JobEventType::Complete {
            self.completed = true;
        }

        if self.completed && !self.delivered {
            if let Some(outcome) = &self.buffered {
                self.delivered = true;
                observer.on_evaluated(outcome, self.tracker.state());
            }
        }
    }
}

impl Default for AssessmentAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_outcome(event: &JobEvent) -> Option<EvaluationOutcome> {
    let question_index = event.field("questionIndex").and_then(coerce_index)?;
    Some(EvaluationOutcome {
        question_index,
        score: event.field("score").and_then(coerce_score),
        is_correct: event.field("isCorrect").and_then(Value::as_bool),
        feedback: event.str_field("feedback").map(str::to_owned),
    })
}

fn coerce_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Scores arrive as numbers or numeric strings.
fn coerce_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use study_core::model::JobStatus;

    #[derive(Default)]
    struct Recorder {
        evaluated: Mutex<Vec<EvaluationOutcome>>,
    }

    impl JobObserver for Recorder {}

    impl AssessmentObserver for Recorder {
        fn on_evaluated(&self, outcome: &EvaluationOutcome, _state: &JobSubscriptionState) {
            self.evaluated.lock().push(outcome.clone());
        }
    }

    fn evaluated(score: Value) -> JobEvent {
        JobEvent::new(Process::Assessment, JobEventType::AnswerEvaluated)
            .with_job_id("eval-1")
            .with_field("questionIndex", 2)
            .with_field("score", score)
            .with_field("isCorrect", true)
            .with_field("feedback", "Good answer")
    }

    fn complete() -> JobEvent {
        JobEvent::new(Process::Assessment, JobEventType::Complete).with_job_id("eval-1")
    }

    #[test]
    fn verdict_is_buffered_until_the_terminal_complete() {
        let recorder = Recorder::default();
        let mut adapter = AssessmentAdapter::new();

        adapter.handle(&evaluated(Value::from(0.9)), &recorder);
        assert!(recorder.evaluated.lock().is_empty());

        adapter.handle(&complete(), &recorder);
        let seen = recorder.evaluated.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].question_index, 2);
        assert_eq!(seen[0].score, Some(0.9));
        assert_eq!(seen[0].is_correct, Some(true));
        assert_eq!(seen[0].feedback.as_deref(), Some("Good answer"));
        assert_eq!(adapter.state().status(), JobStatus::Complete);
    }

    #[test]
    fn numeric_string_scores_are_coerced() {
        let recorder = Recorder::default();
        let mut adapter = AssessmentAdapter::new();

        adapter.handle(&evaluated(Value::from("0.75")), &recorder);
        adapter.handle(&complete(), &recorder);

        assert_eq!(recorder.evaluated.lock()[0].score, Some(0.75));
    }

    #[test]
    fn verdict_arriving_after_complete_still_fires_once() {
        let recorder = Recorder::default();
        let mut adapter = AssessmentAdapter::new();

        adapter.handle(&complete(), &recorder);
        assert!(recorder.evaluated.lock().is_empty());

        adapter.handle(&evaluated(Value::from(1.0)), &recorder);
        assert_eq!(recorder.evaluated.lock().len(), 1);

        // replays do not re-fire
        adapter.handle(&complete(), &recorder);
        adapter.handle(&evaluated(Value::from(1.0)), &recorder);
        assert_eq!(recorder.evaluated.lock().len(), 1);
    }

    #[test]
    fn completion_without_any_verdict_does_not_fire_on_evaluated() {
        let recorder = Recorder::default();
        let mut adapter = AssessmentAdapter::new();

        adapter.handle(&complete(), &recorder);
        assert!(recorder.evaluated.lock().is_empty());
        assert!(adapter.buffered_outcome().is_none());
    }

    #[test]
    fn malformed_verdicts_are_ignored() {
        let recorder = Recorder::default();
        let mut adapter = AssessmentAdapter::new();

        let missing_index = JobEvent::new(Process::Assessment, JobEventType::AnswerEvaluated)
            .with_field("score", 1.0);
        adapter.handle(&missing_index, &recorder);
        adapter.handle(&complete(), &recorder);

        assert!(recorder.evaluated.lock().is_empty());
    }
}
