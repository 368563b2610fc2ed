use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use study_core::model::{Channel, JobEvent};

//
// ─── ERRORS & STATES ───────────────────────────────────────────────────────────
//

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("connection closed")]
    Closed,
}

/// Lifecycle of the single underlying realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Frames the transport delivers to the channel manager, already parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    State(ConnectionState),
    Publication { channel: Channel, event: JobEvent },
    Subscribed { channel: Channel },
    Unsubscribed { channel: Channel },
    Error { channel: Channel, message: String },
}

//
// ─── TRANSPORT SEAMS ───────────────────────────────────────────────────────────
//

/// Inbound side of the transport; the link pumps parsed frames here.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn on_frame(&self, frame: ServerFrame);
}

/// Outbound side of the transport.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Establish the underlying connection. Parsed frames flow into `sink`
    /// until the connection drops.
    async fn connect(&self, sink: Arc<dyn FrameSink>) -> Result<(), TransportError>;

    /// Ask the server to start publishing the channel to us.
    async fn send_subscribe(&self, channel: &Channel) -> Result<(), TransportError>;

    /// Ask the server to stop publishing the channel.
    async fn send_unsubscribe(&self, channel: &Channel) -> Result<(), TransportError>;
}

/// Connection-level state transitions, independent of any channel.
pub trait ConnectionObserver: Send + Sync {
    fn on_state_change(&self, state: ConnectionState);
}

/// Per-channel notifications delivered to a subscriber.
pub trait ChannelListener: Send + Sync {
    fn on_publication(&self, event: &JobEvent);

    fn on_subscribed(&self) {}

    fn on_unsubscribed(&self) {}

    fn on_error(&self, message: &str) {
        let _ = message;
    }
}

/// Proof of one `subscribe` call. A handle goes stale when its channel is
/// re-subscribed; stale handles can no longer tear anything down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    channel: Channel,
    generation: u64,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

//
// ─── CHANNEL MANAGER ───────────────────────────────────────────────────────────
//

struct Entry {
    generation: u64,
    listener: Arc<dyn ChannelListener>,
    /// Whether the wire subscribe request has gone out for this channel.
    requested: bool,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    channels: HashMap<Channel, Entry>,
    /// Channels whose wire subscribe is waiting for the `Connected` state.
    pending: Vec<Channel>,
    next_generation: u64,
    state_observer: Option<Arc<dyn ConnectionObserver>>,
}

/// Owns the persistent connection and multiplexes lettered channels over it.
///
/// One channel carries events for exactly one job. Re-subscribing a channel
/// replaces the previous listener set before any further delivery, so one
/// published event is never delivered twice. A subscribe issued while the
/// connection is not up is queued and flushed on the `Connected` transition;
/// on disconnect every channel is re-queued so a later reconnect restores
/// the same subscriptions.
pub struct ChannelManager {
    link: Arc<dyn TransportLink>,
    inner: Mutex<Inner>,
}

impl ChannelManager {
    #[must_use]
    pub fn new(link: Arc<dyn TransportLink>) -> Arc<Self> {
        Arc::new(Self {
            link,
            inner: Mutex::new(Inner::default()),
        })
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Register the observer notified on every connection-state transition.
    /// Replaces any prior observer.
    pub fn set_state_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.inner.lock().state_observer = Some(observer);
    }

    /// Establish the underlying connection.
    ///
    /// The `Connected` transition itself arrives as a frame from the link;
    /// until then subscriptions queue.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connect` when the link cannot be established;
    /// the manager falls back to `Disconnected`.
    pub async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        self.apply_state(ConnectionState::Connecting).await;
        let sink: Arc<dyn FrameSink> = Arc::clone(self) as Arc<dyn FrameSink>;
        match self.link.connect(sink).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.apply_state(ConnectionState::Disconnected).await;
                Err(err)
            }
        }
    }

    /// Register a listener for the channel and (once connected) request it
    /// from the server. Replaces any live subscription for the same channel.
    pub async fn subscribe(
        &self,
        channel: Channel,
        listener: Arc<dyn ChannelListener>,
    ) -> SubscriptionHandle {
        let send_now;
        let generation;
        {
            let mut inner = self.inner.lock();
            inner.next_generation += 1;
            generation = inner.next_generation;

            let was_requested = inner
                .channels
                .get(&channel)
                .is_some_and(|entry| entry.requested);
            let connected = inner.state == ConnectionState::Connected;
            send_now = connected && !was_requested;

            let _ = inner.channels.insert(
                channel.clone(),
                Entry {
                    generation,
                    listener,
                    requested: was_requested || send_now,
                },
            );

            if !connected && !was_requested && !inner.pending.contains(&channel) {
                inner.pending.push(channel.clone());
            }
        }

        if send_now {
            self.request_subscribe(&channel).await;
        }

        SubscriptionHandle {
            channel,
            generation,
        }
    }

    /// Remove the handle's listener set and release the channel. Idempotent;
    /// a stale handle (superseded by a re-subscribe) is a no-op.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let removed;
        let send_wire;
        {
            let mut inner = self.inner.lock();
            let is_current = inner
                .channels
                .get(&handle.channel)
                .is_some_and(|entry| entry.generation == handle.generation);
            if !is_current {
                return;
            }
            removed = inner.channels.remove(&handle.channel);
            inner.pending.retain(|c| c != &handle.channel);
            send_wire = inner.state == ConnectionState::Connected
                && removed.as_ref().is_some_and(|entry| entry.requested);
        }

        if let Some(entry) = &removed {
            entry.listener.on_unsubscribed();
        }
        if send_wire {
            if let Err(err) = self.link.send_unsubscribe(&handle.channel).await {
                warn!(channel = %handle.channel, %err, "unsubscribe request failed");
            }
        }
    }

    async fn request_subscribe(&self, channel: &Channel) {
        if let Err(err) = self.link.send_subscribe(channel).await {
            warn!(channel = %channel, %err, "subscribe request failed; queueing for retry");
            let mut inner = self.inner.lock();
            if let Some(entry) = inner.channels.get_mut(channel) {
                entry.requested = false;
            }
            if !inner.pending.contains(channel) {
                inner.pending.push(channel.clone());
            }
        }
    }

    async fn apply_state(&self, state: ConnectionState) {
        let flush: Vec<Channel>;
        let notify;
        {
            let mut inner = self.inner.lock();
            notify = (inner.state != state)
                .then(|| inner.state_observer.clone())
                .flatten();
            inner.state = state;
            match state {
                ConnectionState::Connected => {
                    flush = std::mem::take(&mut inner.pending);
                    for channel in &flush {
                        if let Some(entry) = inner.channels.get_mut(channel) {
                            entry.requested = true;
                        }
                    }
                }
                ConnectionState::Disconnected => {
                    // Re-queue everything so a reconnect restores the set.
                    let channels: Vec<Channel> = inner.channels.keys().cloned().collect();
                    for channel in channels {
                        if let Some(entry) = inner.channels.get_mut(&channel) {
                            entry.requested = false;
                        }
                        if !inner.pending.contains(&channel) {
                            inner.pending.push(channel);
                        }
                    }
                    flush = Vec::new();
                }
                ConnectionState::Connecting => flush = Vec::new(),
            }
        }

        if let Some(observer) = notify {
            observer.on_state_change(state);
        }
        for channel in flush {
            self.request_subscribe(&channel).await;
        }
    }

    fn listener_for(&self, channel: &Channel) -> Option<Arc<dyn ChannelListener>> {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map(|entry| Arc::clone(&entry.listener))
    }
}

#[async_trait]
impl FrameSink for ChannelManager {
    async fn on_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::State(state) => self.apply_state(state).await,
            ServerFrame::Publication { channel, event } => match self.listener_for(&channel) {
                Some(listener) => listener.on_publication(&event),
                None => debug!(channel = %channel, "publication for channel with no listener"),
            },
            ServerFrame::Subscribed { channel } => {
                if let Some(listener) = self.listener_for(&channel) {
                    listener.on_subscribed();
                }
            }
            ServerFrame::Unsubscribed { channel } => {
                if let Some(listener) = self.listener_for(&channel) {
                    listener.on_unsubscribed();
                }
            }
            ServerFrame::Error { channel, message } => {
                // The channel stays subscribed; reconnection handling is the
                // caller's decision.
                match self.listener_for(&channel) {
                    Some(listener) => listener.on_error(&message),
                    None => warn!(channel = %channel, message, "channel error with no listener"),
                }
            }
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
