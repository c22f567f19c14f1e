//! Wire and domain types shared by the link and synchronization layers.
//!
//! - [`BinaryFrame`] is the binary media unit: a 12-byte header followed by raw media bytes
//! - [`ControlMessage`] is the outbound `{kind, param}` JSON shape
//! - [`InboundMessage`] keeps inbound JSON whole so unknown kinds pass through untouched
//! - [`AlgorithmResult`] is a timestamped classification or detection result
//!
//! ## Usage Example
//!
//! ```rust
//! use bytes::Bytes;
//! use sightline::types::{BinaryFrame, ChannelId};
//!
//! let mut raw = 2u32.to_le_bytes().to_vec();
//! raw.extend_from_slice(&123_456_789u64.to_le_bytes());
//! raw.extend_from_slice(b"\x00\x00\x00\x01");
//!
//! let frame = BinaryFrame::parse(Bytes::from(raw)).unwrap();
//! assert_eq!(frame.channel, ChannelId::new(2));
//! assert_eq!(frame.timestamp, 123_456_789);
//! assert_eq!(frame.payload.len(), 4);
//! ```

mod channel;
mod frame;
mod message;
mod result;

pub use channel::ChannelId;
pub use frame::{BinaryFrame, FRAME_HEADER_LEN};
pub use message::{ControlMessage, InboundMessage, RequestKind, kinds};
pub use result::{AlgorithmResult, DetectionBox, ResultPayload};
