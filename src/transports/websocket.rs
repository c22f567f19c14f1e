//! Websocket connector backed by tokio-tungstenite

use bytes::Bytes;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace};

use crate::transport::{Connector, Socket, WireMessage};
use crate::{ConsoleError, Result};

/// Opens `ws://` and `wss://` sockets to the device.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Socket> {
        info!("Connecting to device at {}", url);

        let (ws_stream, response) = connect_async(url).await.map_err(|e| {
            ConsoleError::connection_failed_with_source(url, "websocket handshake failed", Box::new(e))
        })?;
        debug!("Websocket handshake complete ({})", response.status());

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(ConsoleError::from)
            .with(|message: WireMessage| future::ready(Ok::<_, ConsoleError>(to_tungstenite(message))));

        let stream = read.filter_map(|item| future::ready(from_tungstenite(item)));

        Ok(Socket::new(Box::pin(sink), stream.boxed()))
    }
}

fn to_tungstenite(message: WireMessage) -> Message {
    match message {
        WireMessage::Text(text) => Message::Text(text),
        WireMessage::Binary(data) => Message::Binary(data.to_vec()),
        WireMessage::Close => Message::Close(None),
    }
}

fn from_tungstenite(
    item: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<WireMessage>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(WireMessage::Text(text))),
        Ok(Message::Binary(data)) => Some(Ok(WireMessage::Binary(Bytes::from(data)))),
        Ok(Message::Close(frame)) => {
            debug!("Device sent close frame: {:?}", frame);
            Some(Ok(WireMessage::Close))
        }
        // tungstenite answers pings itself
        Ok(other) => {
            trace!("Ignoring control frame {:?}", other);
            None
        }
        Err(e) => Some(Err(e.into())),
    }
}
