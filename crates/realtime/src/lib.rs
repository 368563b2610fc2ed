#![forbid(unsafe_code)]

//! Client side of the realtime job pipeline: one persistent connection,
//! lettered channels multiplexed over it, and per-process interpreters that
//! turn raw job events into a uniform progress model.

pub mod adapters;
pub mod tracker;
pub mod transport;
pub mod websocket;

pub use adapters::{
    AssessmentAdapter, AssessmentObserver, CardGenAdapter, CardGenObserver, ChatAdapter,
    ChatObserver, IngestionAdapter,
};
pub use tracker::{JobObserver, JobTracker};
pub use transport::{
    ChannelListener, ChannelManager, ConnectionObserver, ConnectionState, FrameSink, ServerFrame,
    SubscriptionHandle, TransportError, TransportLink,
};
pub use websocket::WebsocketLink;
