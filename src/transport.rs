//! Connector trait for the device socket

use bytes::Bytes;
use futures::Sink;
use futures::stream::BoxStream;
use std::pin::Pin;

use crate::Result;

/// One websocket message, independent of the socket implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// JSON control or telemetry text
    Text(String),
    /// Media frame with its 12-byte header
    Binary(Bytes),
    /// Close handshake
    Close,
}

/// Writing half of a socket.
pub type WireSink = Pin<Box<dyn Sink<WireMessage, Error = crate::ConsoleError> + Send>>;

/// Reading half of a socket. Ends when the peer goes away.
pub type WireStream = BoxStream<'static, Result<WireMessage>>;

/// An open socket, split into its two halves.
pub struct Socket {
    pub sink: WireSink,
    pub stream: WireStream,
}

impl Socket {
    pub fn new(sink: WireSink, stream: WireStream) -> Self {
        Self { sink, stream }
    }
}

/// Trait for opening device sockets
///
/// The driver calls [`connect`](Connector::connect) once per connection attempt and owns
/// the returned socket until it fails or is released. Implementations do not retry;
/// reconnect policy lives in the driver.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a socket to `url`
    ///
    /// Returns:
    /// - `Ok(socket)` - Handshake complete, socket ready for traffic
    /// - `Err(e)` - Connection refused, handshake failed or address unusable
    async fn connect(&self, url: &str) -> Result<Socket>;
}
