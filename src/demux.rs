//! Binary frame demultiplexing onto channels

use bytes::Bytes;
use tracing::trace;

use crate::Result;
use crate::channel::ChannelTable;
use crate::config::DemuxConfig;
use crate::types::{BinaryFrame, ChannelId};

/// What happened to one binary message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Payload was fed to the channel's sink
    Delivered {
        channel: ChannelId,
        /// This frame latched the channel's epoch
        latched: bool,
        /// Payload counted as a played picture
        counted: bool,
    },
    /// No active stream on the channel; frame dropped
    Unbound { channel: ChannelId },
}

/// Splits binary messages by channel and feeds their payloads to the bound sinks.
#[derive(Debug, Clone, Copy)]
pub struct Demuxer {
    min_picture_len: usize,
}

impl Default for Demuxer {
    fn default() -> Self {
        Self::new(&DemuxConfig::default())
    }
}

impl Demuxer {
    pub fn new(config: &DemuxConfig) -> Self {
        Self { min_picture_len: config.min_picture_len }
    }

    /// Decode the frame header.
    pub fn demux(&self, raw: Bytes) -> Result<BinaryFrame> {
        BinaryFrame::parse(raw)
    }

    /// Decode one binary message and deliver it to its channel.
    ///
    /// The first frame of a stream session latches the channel's epoch. Truncated
    /// messages are an error for that message only; the table is left untouched.
    pub fn route(&self, table: &mut ChannelTable, raw: Bytes) -> Result<Delivery> {
        let BinaryFrame { channel, timestamp, payload } = self.demux(raw)?;

        let Some(state) = table.get_mut(channel) else {
            trace!("Dropping frame for unbound channel {}", channel);
            return Ok(Delivery::Unbound { channel });
        };

        let latched = state.latch_epoch(timestamp);
        let counted = state.feed(payload, self.min_picture_len);
        Ok(Delivery::Delivered { channel, latched, counted })
    }
}
