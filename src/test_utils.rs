//! Test doubles for the device link and channel collaborators
//!
//! Shared by unit tests and benchmarks: an in-memory [`Connector`] whose far end is driven
//! by the test, a media sink that records what it is fed, and a playback source whose
//! position the test moves by hand.

#![cfg(any(test, feature = "benchmark"))]

use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use crate::channel::{MediaSink, PlaybackSource};
use crate::transport::{Connector, Socket, WireMessage};
use crate::types::{AlgorithmResult, BinaryFrame, ChannelId, ResultPayload};
use crate::{ConsoleError, Result};

/// Create a connected mock connector / device pair.
pub fn mock_link() -> (MockConnector, MockDevice) {
    let (socket_tx, socket_rx) = mpsc::unbounded();
    let shared = Arc::new(Mutex::new(LinkState { accepting: true, urls: Vec::new() }));
    (MockConnector { shared: shared.clone(), sockets: socket_tx }, MockDevice { shared, sockets: socket_rx })
}

struct LinkState {
    accepting: bool,
    urls: Vec<String>,
}

/// In-memory [`Connector`]; every accepted connection shows up on the paired [`MockDevice`].
pub struct MockConnector {
    shared: Arc<Mutex<LinkState>>,
    sockets: mpsc::UnboundedSender<DeviceSocket>,
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Socket> {
        let accepting = {
            let mut shared = self.shared.lock();
            shared.urls.push(url.to_string());
            shared.accepting
        };
        if !accepting {
            return Err(ConsoleError::connection_failed(url, "refused by mock device"));
        }

        let (to_client, client_rx) = mpsc::unbounded::<Result<WireMessage>>();
        let (client_tx, from_client) = mpsc::unbounded::<WireMessage>();

        self.sockets
            .unbounded_send(DeviceSocket { to_client, from_client })
            .map_err(|_| ConsoleError::connection_failed(url, "mock device dropped"))?;

        let sink = client_tx.sink_map_err(|e| ConsoleError::transport(e.to_string()));
        Ok(Socket::new(Box::pin(sink), client_rx.boxed()))
    }
}

/// The device side of a [`mock_link`].
pub struct MockDevice {
    shared: Arc<Mutex<LinkState>>,
    sockets: mpsc::UnboundedReceiver<DeviceSocket>,
}

impl MockDevice {
    /// Refuse every following connection attempt
    pub fn refuse_connections(&self) {
        self.shared.lock().accepting = false;
    }

    pub fn accept_connections(&self) {
        self.shared.lock().accepting = true;
    }

    /// Connection attempts seen so far, accepted or not
    pub fn attempts(&self) -> usize {
        self.shared.lock().urls.len()
    }

    /// Urls of every connection attempt
    pub fn urls(&self) -> Vec<String> {
        self.shared.lock().urls.clone()
    }

    /// Wait for the next accepted connection
    pub async fn next_socket(&mut self) -> Option<DeviceSocket> {
        self.sockets.next().await
    }
}

/// Device end of one accepted socket.
///
/// Dropping it ends the client's read stream, which the client sees as a remote close.
pub struct DeviceSocket {
    to_client: mpsc::UnboundedSender<Result<WireMessage>>,
    from_client: mpsc::UnboundedReceiver<WireMessage>,
}

impl DeviceSocket {
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.unbounded_send(Ok(WireMessage::Text(text.into())));
    }

    pub fn send_json(&self, value: Value) {
        self.send_text(value.to_string());
    }

    pub fn send_binary(&self, data: Bytes) {
        let _ = self.to_client.unbounded_send(Ok(WireMessage::Binary(data)));
    }

    /// Send a close frame
    pub fn send_close(&self) {
        let _ = self.to_client.unbounded_send(Ok(WireMessage::Close));
    }

    /// Fail the client's read stream with a transport error
    pub fn fail(&self, reason: &str) {
        let _ = self.to_client.unbounded_send(Err(ConsoleError::transport(reason)));
    }

    /// Next message written by the client; `None` once the client released the socket
    pub async fn next_message(&mut self) -> Option<WireMessage> {
        self.from_client.next().await
    }

    /// Next text message written by the client, skipping anything else
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            if let WireMessage::Text(text) = self.next_message().await? {
                return Some(text);
            }
        }
    }

    /// Next text message parsed as JSON
    pub async fn next_json(&mut self) -> Option<Value> {
        let text = self.next_text().await?;
        serde_json::from_str(&text).ok()
    }
}

#[derive(Default)]
struct SinkLog {
    payloads: Vec<Bytes>,
    destroyed: bool,
}

/// [`MediaSink`] recording every payload; clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
}

impl RecordingSink {
    pub fn payloads(&self) -> Vec<Bytes> {
        self.log.lock().payloads.clone()
    }

    pub fn destroyed(&self) -> bool {
        self.log.lock().destroyed
    }
}

impl MediaSink for RecordingSink {
    fn feed(&mut self, payload: Bytes) {
        self.log.lock().payloads.push(payload);
    }

    fn destroy(&mut self) {
        self.log.lock().destroyed = true;
    }
}

struct PlaybackState {
    position: f64,
    buffered_end: Option<f64>,
    rate: f64,
    rate_changes: Vec<f64>,
    seeks: Vec<f64>,
}

/// [`PlaybackSource`] moved by hand; clones share the same state.
#[derive(Clone)]
pub struct ManualPlayback {
    state: Arc<Mutex<PlaybackState>>,
}

impl ManualPlayback {
    pub fn new(position: f64, buffered_end: Option<f64>) -> Self {
        let state = PlaybackState {
            position,
            buffered_end,
            rate: 1.0,
            rate_changes: Vec::new(),
            seeks: Vec::new(),
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    pub fn position(&self) -> f64 {
        self.state.lock().position
    }

    pub fn set_position(&self, position: f64) {
        self.state.lock().position = position;
    }

    pub fn set_buffered_end(&self, buffered_end: Option<f64>) {
        self.state.lock().buffered_end = buffered_end;
    }

    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    /// Every rate pushed by the clock, in order
    pub fn rate_changes(&self) -> Vec<f64> {
        self.state.lock().rate_changes.clone()
    }

    /// Every seek performed by the clock, in order
    pub fn seeks(&self) -> Vec<f64> {
        self.state.lock().seeks.clone()
    }
}

impl PlaybackSource for ManualPlayback {
    fn position(&self) -> f64 {
        self.state.lock().position
    }

    fn buffered_end(&self) -> Option<f64> {
        self.state.lock().buffered_end
    }

    fn set_rate(&mut self, rate: f64) {
        let mut state = self.state.lock();
        state.rate = rate;
        state.rate_changes.push(rate);
    }

    fn seek(&mut self, position: f64) {
        let mut state = self.state.lock();
        state.position = position;
        state.seeks.push(position);
    }
}

/// Classification result whose text names its timestamp, e.g. `t=1500`
pub fn classification_at(channel: u32, timestamp: u64) -> AlgorithmResult {
    AlgorithmResult::new(
        ChannelId::new(channel),
        timestamp,
        ResultPayload::Classification(format!("t={timestamp}")),
    )
}

/// Encoded binary frame as the device sends it
pub fn frame_bytes(channel: u32, timestamp: u64, payload: &[u8]) -> Bytes {
    BinaryFrame {
        channel: ChannelId::new(channel),
        timestamp,
        payload: Bytes::copy_from_slice(payload),
    }
    .encode()
}
