//! Wires one free-text evaluation job to the session runner.
//!
//! When a submit comes back with a job pointer, the caller subscribes an
//! `EvaluationBridge` to the job's channel. The bridge interprets the event
//! stream through the assessment adapter, hands the verdict (or failure) to
//! the runner, and gives up after the evaluation timeout so the session
//! never waits forever on a silent backend.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use realtime::adapters::{AssessmentAdapter, AssessmentObserver};
use realtime::tracker::JobObserver;
use realtime::transport::{ChannelListener, ChannelManager, SubscriptionHandle};
use study_core::model::{Channel, EvaluationOutcome, JobEvent, JobSubscriptionState};

use crate::runner::SessionRunner;
use crate::session::EVALUATION_TIMEOUT_SECS;

/// Listens on one evaluation channel on behalf of one answered slot.
pub struct EvaluationBridge {
    runner: Arc<SessionRunner>,
    slot_index: usize,
    adapter: Mutex<AssessmentAdapter>,
    timeout: Mutex<Option<JoinHandle<()>>>,
}

impl EvaluationBridge {
    #[must_use]
    pub fn new(runner: Arc<SessionRunner>, slot_index: usize) -> Arc<Self> {
        Arc::new(Self {
            runner,
            slot_index,
            adapter: Mutex::new(AssessmentAdapter::new()),
            timeout: Mutex::new(None),
        })
    }

    /// Subscribe this bridge to the evaluation channel and start the
    /// timeout. The returned handle tears the subscription down.
    pub async fn attach(
        self: &Arc<Self>,
        manager: &ChannelManager,
        channel: Channel,
    ) -> SubscriptionHandle {
        let listener: Arc<dyn ChannelListener> = Arc::clone(self) as Arc<dyn ChannelListener>;
        let handle = manager.subscribe(channel, listener).await;
        self.arm_timeout();
        handle
    }

    /// Start the give-up timer. After `EVALUATION_TIMEOUT_SECS` without a
    /// verdict the slot's evaluation is force-expired; a verdict or failure
    /// arriving first disarms the timer.
    pub fn arm_timeout(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let slot_index = self.slot_index;
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(EVALUATION_TIMEOUT_SECS as u64)).await;
            if let Some(bridge) = weak.upgrade() {
                debug!(slot = slot_index, "evaluation timer fired");
                let _ = bridge.runner.force_expire_evaluation(slot_index);
            }
        });
        if let Some(previous) = self.timeout.lock().replace(task) {
            previous.abort();
        }
    }

    fn disarm_timeout(&self) {
        if let Some(task) = self.timeout.lock().take() {
            task.abort();
        }
    }
}

impl Drop for EvaluationBridge {
    fn drop(&mut self) {
        self.disarm_timeout();
    }
}

impl ChannelListener for EvaluationBridge {
    fn on_publication(&self, event: &JobEvent) {
        self.adapter.lock().handle(event, self);
    }

    fn on_error(&self, message: &str) {
        self.disarm_timeout();
        let _ = self.runner.fail_evaluation(self.slot_index, message);
    }

    fn on_unsubscribed(&self) {
        self.disarm_timeout();
    }
}

impl JobObserver for EvaluationBridge {
    fn on_error(&self, _state: &JobSubscriptionState, message: &str) {
        self.disarm_timeout();
        let _ = self.runner.fail_evaluation(self.slot_index, message);
    }
}

impl AssessmentObserver for EvaluationBridge {
    fn on_evaluated(&self, outcome: &EvaluationOutcome, _state: &JobSubscriptionState) {
        self.disarm_timeout();
        if !self.runner.apply_evaluation(outcome.clone()) {
            debug!(slot = self.slot_index, "verdict arrived for a settled evaluation");
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
