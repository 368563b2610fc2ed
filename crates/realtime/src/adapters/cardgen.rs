use serde_json::Value;

use study_core::model::{JobEvent, JobEventType, JobSubscriptionState, Process};

use crate::tracker::{JobObserver, JobTracker};

/// Card-generation callbacks, on top of the generic job contract.
pub trait CardGenObserver: JobObserver {
    /// Terminal completion, with the generated card count when the backend
    /// reports one.
    fn on_cards_ready(&self, count: Option<u64>, state: &JobSubscriptionState) {
        let _ = (count, state);
    }
}

/// Interprets an AI card-generation job.
pub struct CardGenAdapter {
    tracker: JobTracker,
}

impl CardGenAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracker: JobTracker::new(Process::CardGen),
        }
    }

    #[must_use]
    pub fn state(&self) -> &JobSubscriptionState {
        self.tracker.state()
    }

    pub fn handle(&mut self, event: &JobEvent, observer: &dyn CardGenObserver) {
        self.tracker.apply(event, observer as &dyn JobObserver);
        if event.process == Process::CardGen && event.event_type == JobEventType::Complete {
            let count = event.field("cardCount").and_then(Value::as_u64);
            observer.on_cards_ready(count, self.tracker.state());
        }
    }
}

impl Default for CardGenAdapter {
    fn default() -> Self {
        Self::new()
    }
}
