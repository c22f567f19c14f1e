//! Events delivered to the application

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::channel::ChannelStats;
use crate::types::{AlgorithmResult, ChannelId, DetectionBox, InboundMessage, ResultPayload};

/// Everything the runtime reports upward, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The link is open; request device configuration now
    Opened,

    /// Application control/telemetry message, unchanged
    Message(InboundMessage),

    /// The socket went away; per-channel streams have been torn down
    Disconnected { error: Option<String> },

    /// A reconnect attempt is scheduled
    Reconnecting { attempt: u32, max_attempts: u32 },

    /// Reconnect budget exhausted; only an explicit `connect` restarts the link
    LinkLost { attempts: u32 },

    /// Another client took over this session; no automatic reconnect will follow
    Superseded,

    /// Classification aligned to the frame on screen
    Classification { channel: ChannelId, timestamp: u64, text: String },

    /// Detections aligned to the frame on screen, replacing the previous set
    Detections { channel: ChannelId, timestamp: u64, boxes: Vec<DetectionBox> },

    /// Overlay content for the channel is stale and should be cleared
    OverlayExpired { channel: ChannelId },

    /// Per-interval counters
    ChannelStats(ChannelStats),
}

impl From<AlgorithmResult> for ClientEvent {
    fn from(result: AlgorithmResult) -> Self {
        let AlgorithmResult { channel, timestamp, payload } = result;
        match payload {
            ResultPayload::Classification(text) => {
                ClientEvent::Classification { channel, timestamp, text }
            }
            ResultPayload::Detection(boxes) => ClientEvent::Detections { channel, timestamp, boxes },
        }
    }
}

/// Sending half shared by the driver and the frame loops.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventSender {
    pub(crate) fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, EventStream { inner: UnboundedReceiverStream::new(rx) })
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        if let Err(err) = self.tx.send(event) {
            trace!("Event stream dropped, discarding {:?}", err.0);
        }
    }
}

pin_project! {
    /// Stream of [`ClientEvent`]s returned when the client is constructed.
    ///
    /// Ends once the client and all of its tasks are gone.
    pub struct EventStream {
        #[pin]
        inner: UnboundedReceiverStream<ClientEvent>,
    }
}

impl Stream for EventStream {
    type Item = ClientEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}
