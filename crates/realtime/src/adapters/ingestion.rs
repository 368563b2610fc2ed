use study_core::model::{JobEvent, JobSubscriptionState, Process};

use crate::tracker::{JobObserver, JobTracker};

/// Ingestion jobs carry no payload beyond the status progression, so this is
/// the generic tracker with the process pinned.
pub struct IngestionAdapter {
    tracker: JobTracker,
}

impl IngestionAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracker: JobTracker::new(Process::Ingestion),
        }
    }

    #[must_use]
    pub fn state(&self) -> &JobSubscriptionState {
        self.tracker.state()
    }

    pub fn handle(&mut self, event: &JobEvent, observer: &dyn JobObserver) {
        self.tracker.apply(event, observer);
    }
}

impl Default for IngestionAdapter {
    fn default() -> Self {
        Self::new()
    }
}
