//! Websocket implementation of the transport link.
//!
//! Frames are JSON documents tagged by `kind` (server → client) or `op`
//! (client → server). Unparseable frames are dropped, never fatal.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use study_core::model::{Channel, JobEvent};

use crate::transport::{ConnectionState, FrameSink, ServerFrame, TransportError, TransportLink};

//
// ─── WIRE FRAMES ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WireFrame {
    State {
        state: WireState,
    },
    Publication {
        channel: Channel,
        data: JobEvent,
    },
    Subscribed {
        channel: Channel,
    },
    Unsubscribed {
        channel: Channel,
    },
    Error {
        channel: Channel,
        #[serde(default)]
        message: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireState {
    Connecting,
    Connected,
    Disconnected,
}

impl WireFrame {
    fn into_server_frame(self) -> ServerFrame {
        match self {
            WireFrame::State { state } => ServerFrame::State(match state {
                WireState::Connecting => ConnectionState::Connecting,
                WireState::Connected => ConnectionState::Connected,
                WireState::Disconnected => ConnectionState::Disconnected,
            }),
            WireFrame::Publication { channel, data } => ServerFrame::Publication {
                channel,
                event: data,
            },
            WireFrame::Subscribed { channel } => ServerFrame::Subscribed { channel },
            WireFrame::Unsubscribed { channel } => ServerFrame::Unsubscribed { channel },
            WireFrame::Error { channel, message } => ServerFrame::Error { channel, message },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Subscribe { channel: &'a Channel },
    Unsubscribe { channel: &'a Channel },
}

//
// ─── LINK ──────────────────────────────────────────────────────────────────────
//

/// Transport link over one websocket connection.
pub struct WebsocketLink {
    url: String,
    outbound: Mutex<Option<UnboundedSender<Message>>>,
}

impl WebsocketLink {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outbound: Mutex::new(None),
        }
    }

    fn send_frame(&self, frame: &ClientFrame<'_>) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(frame).map_err(|err| TransportError::Send(err.to_string()))?;
        let guard = self.outbound.lock();
        let sender = guard.as_ref().ok_or(TransportError::Closed)?;
        sender
            .send(Message::text(text))
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl TransportLink for WebsocketLink {
    async fn connect(&self, sink: Arc<dyn FrameSink>) -> Result<(), TransportError> {
        let (socket, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let (mut writer, mut reader) = socket.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound.lock() = Some(tx);

        drop(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if writer.send(message).await.is_err() {
                    break;
                }
            }
        }));

        let pump_sink = Arc::clone(&sink);
        drop(tokio::spawn(async move {
            while let Some(next) = reader.next().await {
                match next {
                    Ok(Message::Text(text)) => dispatch(pump_sink.as_ref(), text.as_str()).await,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            pump_sink
                .on_frame(ServerFrame::State(ConnectionState::Disconnected))
                .await;
        }));

        sink.on_frame(ServerFrame::State(ConnectionState::Connected))
            .await;
        Ok(())
    }

    async fn send_subscribe(&self, channel: &Channel) -> Result<(), TransportError> {
        self.send_frame(&ClientFrame::Subscribe { channel })
    }

    async fn send_unsubscribe(&self, channel: &Channel) -> Result<(), TransportError> {
        self.send_frame(&ClientFrame::Unsubscribe { channel })
    }
}

async fn dispatch(sink: &dyn FrameSink, text: &str) {
    let frame: WireFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(%err, "dropping unparseable frame");
            return;
        }
    };
    sink.on_frame(frame.into_server_frame()).await;
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use study_core::model::{JobEventType, Process};

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<ServerFrame>>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn on_frame(&self, frame: ServerFrame) {
            self.frames.lock().push(frame);
        }
    }

    #[tokio::test]
    async fn publication_frame_parses_into_event() {
        let sink = RecordingSink::default();
        dispatch(
            &sink,
            r#"{"kind":"publication","channel":"chat:job:7",
                "data":{"process":"chat","type":"chunk","jobId":"7","content":"hi"}}"#,
        )
        .await;

        let frames = sink.frames.lock();
        let ServerFrame::Publication { channel, event } = &frames[0] else {
            panic!("expected publication");
        };
        assert_eq!(channel, &Channel::new("chat:job:7"));
        assert_eq!(event.process, Process::Chat);
        assert_eq!(event.event_type, JobEventType::Chunk);
        assert_eq!(event.content(), Some("hi"));
    }

    #[tokio::test]
    async fn state_frame_parses() {
        let sink = RecordingSink::default();
        dispatch(&sink, r#"{"kind":"state","state":"connected"}"#).await;

        assert_eq!(
            sink.frames.lock().as_slice(),
            &[ServerFrame::State(ConnectionState::Connected)]
        );
    }

    #[tokio::test]
    async fn unparseable_frames_are_dropped() {
        let sink = RecordingSink::default();
        dispatch(&sink, "not json").await;
        dispatch(&sink, r#"{"kind":"mystery"}"#).await;

        assert!(sink.frames.lock().is_empty());
    }

    #[test]
    fn client_frames_serialize_with_op_tags() {
        let channel = Channel::new("jobs:1");
        let json = serde_json::to_string(&ClientFrame::Subscribe { channel: &channel }).unwrap();
        assert_eq!(json, r#"{"op":"subscribe","channel":"jobs:1"}"#);
    }
}
