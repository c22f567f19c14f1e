//! Binary media frame layout

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::ChannelId;
use crate::{ConsoleError, Result};

/// Size of the fixed binary frame header: 4-byte channel id + 8-byte timestamp.
pub const FRAME_HEADER_LEN: usize = 12;

/// One binary media message as sent by the device.
///
/// Layout (all integers little-endian):
///
/// | offset | size | field                              |
/// |--------|------|------------------------------------|
/// | 0      | 4    | channel id                         |
/// | 4      | 8    | capture timestamp (µs, device epoch) |
/// | 12     | ..   | raw media payload                  |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    /// Channel the payload belongs to
    pub channel: ChannelId,

    /// Capture timestamp in microseconds since the device-local epoch
    pub timestamp: u64,

    /// Media bytes after the header (zero-copy slice of the original message)
    pub payload: Bytes,
}

impl BinaryFrame {
    /// Parse a raw binary message.
    ///
    /// Fails with [`ConsoleError::Framing`] when the message cannot hold the header.
    pub fn parse(raw: Bytes) -> Result<Self> {
        if raw.len() < FRAME_HEADER_LEN {
            return Err(ConsoleError::framing(raw.len(), FRAME_HEADER_LEN));
        }

        let mut header = raw.slice(..FRAME_HEADER_LEN);
        let channel = ChannelId::new(header.get_u32_le());
        let timestamp = header.get_u64_le();
        let payload = raw.slice(FRAME_HEADER_LEN..);

        Ok(Self { channel, timestamp, payload })
    }

    /// Serialize back into the wire layout.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.put_u32_le(self.channel.get());
        buf.put_u64_le(self.timestamp);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}
