//! Resilient device link and video-to-metadata synchronization for monitoring consoles.
//!
//! Sightline keeps one websocket connection to an edge device that streams encoded video on
//! several channels together with timestamped algorithm results (classifications and
//! detection boxes). It demultiplexes the binary video frames onto per-channel media sinks,
//! estimates which capture timestamp is on screen for each channel, and pairs every
//! displayed frame with the closest algorithm result.
//!
//! # Features
//!
//! - **Resilient link**: heartbeat, bounded reconnect, send retry, supersession handling
//! - **Demultiplexing**: zero-copy routing of binary frames to per-channel sinks
//! - **Synchronization**: adaptive playback rate and windowed result alignment
//! - **Events**: one ordered stream of link, message and overlay events
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use sightline::{ClientConfig, ClientEvent, RequestKind, TransportClient};
//!
//! #[tokio::main]
//! async fn main() -> sightline::Result<()> {
//!     let (client, mut events) = TransportClient::new(ClientConfig::default())?;
//!     client.connect("ws://192.168.1.10:4567")?;
//!
//!     while let Some(event) = events.next().await {
//!         match event {
//!             ClientEvent::Opened => client.send_request(RequestKind::GetConfig, None)?,
//!             ClientEvent::Classification { channel, text, .. } => {
//!                 println!("channel {channel}: {text}");
//!             }
//!             ClientEvent::LinkLost { .. } => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod channel;
pub mod config;
mod error;
pub mod events;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Link and synchronization runtime
pub mod connection;
pub mod demux;
mod driver;
pub mod sync;
pub mod transport;
pub mod transports;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use channel::{ChannelBinding, ChannelStats, MediaSink, PlaybackSource};
pub use config::ClientConfig;
pub use connection::{ConnectionState, TransportClient};
pub use events::{ClientEvent, EventStream};
pub use transport::{Connector, Socket, WireMessage};
pub use transports::WebSocketConnector;
