use study_core::model::{JobEvent, JobEventType, JobSubscriptionState, Process};

use crate::tracker::{JobObserver, JobTracker};

/// Chat-specific callbacks, on top of the generic job contract.
pub trait ChatObserver: JobObserver {
    /// Incremental content extracted from a `chunk` event, plus the
    /// transcript assembled so far.
    fn on_chunk(&self, delta: &str, transcript: &str) {
        let _ = (delta, transcript);
    }
}

/// Interprets a streaming chat job: accumulates `chunk` content so the
/// caller can render an in-progress message.
pub struct ChatAdapter {
    tracker: JobTracker,
    transcript: String,
}

impl ChatAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracker: JobTracker::new(Process::Chat),
            transcript: String::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &JobSubscriptionState {
        self.tracker.state()
    }

    /// The message assembled from all chunks seen so far.
    #[must_use]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn handle(&mut self, event: &JobEvent, observer: &dyn ChatObserver) {
        if event.process == Process::Chat && event.event_type == JobEventType::Chunk {
            if let Some(delta) = event.content() {
                self.transcript.push_str(delta);
                observer.on_chunk(delta, &self.transcript);
            }
        }
        self.tracker.apply(event, observer as &dyn JobObserver);
    }
}

impl Default for ChatAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use study_core::model::JobStatus;

    #[derive(Default)]
    struct Recorder {
        chunks: Mutex<Vec<String>>,
        completed: Mutex<bool>,
    }

    impl JobObserver for Recorder {
        fn on_complete(&self, _state: &JobSubscriptionState, _event: &JobEvent) {
            *self.completed.lock() = true;
        }
    }

    impl ChatObserver for Recorder {
        fn on_chunk(&self, delta: &str, _transcript: &str) {
            self.chunks.lock().push(delta.to_owned());
        }
    }

    fn chunk(content: &str) -> JobEvent {
        JobEvent::new(Process::Chat, JobEventType::Chunk)
            .with_job_id("chat-1")
            .with_field("content", content)
    }

    #[test]
    fn chunks_assemble_into_a_transcript() {
        let recorder = Recorder::default();
        let mut adapter = ChatAdapter::new();

        adapter.handle(
            &JobEvent::new(Process::Chat, JobEventType::Started),
            &recorder,
        );
        adapter.handle(&chunk("Hello"), &recorder);
        adapter.handle(&chunk(" world"), &recorder);
        adapter.handle(&chunk("!"), &recorder);
        adapter.handle(
            &JobEvent::new(Process::Chat, JobEventType::Complete),
            &recorder,
        );

        assert_eq!(adapter.transcript(), "Hello world!");
        assert_eq!(recorder.chunks.lock().len(), 3);
        assert!(*recorder.completed.lock());
        assert_eq!(adapter.state().status(), JobStatus::Complete);
        assert_eq!(adapter.state().progress(), 100);
    }

    #[test]
    fn chunk_without_content_advances_state_only() {
        let recorder = Recorder::default();
        let mut adapter = ChatAdapter::new();

        adapter.handle(
            &JobEvent::new(Process::Chat, JobEventType::Chunk),
            &recorder,
        );

        assert_eq!(adapter.transcript(), "");
        assert!(recorder.chunks.lock().is_empty());
        assert_eq!(adapter.state().progress(), 50);
    }

    #[test]
    fn events_for_other_processes_do_not_touch_the_transcript() {
        let recorder = Recorder::default();
        let mut adapter = ChatAdapter::new();

        adapter.handle(
            &JobEvent::new(Process::Ingestion, JobEventType::Chunk).with_field("content", "x"),
            &recorder,
        );

        assert_eq!(adapter.transcript(), "");
        assert_eq!(adapter.state().progress(), 0);
    }
}
