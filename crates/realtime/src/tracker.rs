use tracing::warn;

use study_core::model::{JobEvent, JobEventType, JobSubscriptionState, Process};

/// Shared callback contract dispatched as a tracked job changes.
///
/// Implementations use interior mutability where they need to accumulate
/// state; callbacks fire on the event loop, never concurrently for one
/// channel.
pub trait JobObserver: Send + Sync {
    fn on_started(&self, state: &JobSubscriptionState) {
        let _ = state;
    }

    fn on_progress(&self, state: &JobSubscriptionState, event: &JobEvent) {
        let _ = (state, event);
    }

    fn on_complete(&self, state: &JobSubscriptionState, event: &JobEvent) {
        let _ = (state, event);
    }

    fn on_error(&self, state: &JobSubscriptionState, message: &str) {
        let _ = (state, message);
    }
}

/// Normalizes the raw event stream of one channel into a uniform
/// `JobSubscriptionState`, regardless of which process produced it.
pub struct JobTracker {
    expected: Process,
    state: JobSubscriptionState,
}

impl JobTracker {
    #[must_use]
    pub fn new(expected: Process) -> Self {
        Self {
            expected,
            state: JobSubscriptionState::new(),
        }
    }

    #[must_use]
    pub fn expected(&self) -> Process {
        self.expected
    }

    #[must_use]
    pub fn state(&self) -> &JobSubscriptionState {
        &self.state
    }

    /// Fold one event into the derived state and dispatch the matching
    /// observer callback.
    ///
    /// Events tagged with a different process are discarded with a warning.
    /// Malformed payloads fall back to the conservative unknown mapping;
    /// nothing propagates an error past this boundary.
    pub fn apply(&mut self, event: &JobEvent, observer: &dyn JobObserver) {
        if event.process != self.expected {
            warn!(
                expected = %self.expected,
                received = %event.process,
                job = %event.job_id,
                "discarding event for mismatched process"
            );
            return;
        }

        self.state.apply(event);

        match event.event_type {
            JobEventType::Started => observer.on_started(&self.state),
            kind if kind.is_processing() => observer.on_progress(&self.state, event),
            JobEventType::Complete => observer.on_complete(&self.state, event),
            JobEventType::Error => observer.on_error(
                &self.state,
                self.state.error().unwrap_or("job reported an error"),
            ),
            // answer_evaluated and unknown tags update derived state only;
            // process adapters interpret their payloads.
            _ => {}
        }
    }
}
