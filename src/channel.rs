//! Per-channel stream state and the collaborators bound to it

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::AlignmentConfig;
use crate::sync::{NOMINAL_RATE, ResultQueue};
use crate::types::{AlgorithmResult, ChannelId};
use crate::{ConsoleError, Result};

/// Consumer of raw media bytes for one channel (decoder, muxer, recorder...).
pub trait MediaSink: Send + 'static {
    /// Feed one payload exactly as received after the frame header.
    fn feed(&mut self, payload: Bytes);

    /// Release decoder resources. Called once, when the channel stops.
    fn destroy(&mut self);
}

/// Local playback state of one channel's video element.
pub trait PlaybackSource: Send + 'static {
    /// Current playhead in seconds, measured from the first received frame
    fn position(&self) -> f64;

    /// Trailing edge of the buffered media in seconds, if anything is buffered
    fn buffered_end(&self) -> Option<f64>;

    /// Change the playback rate
    fn set_rate(&mut self, rate: f64);

    /// Move the playhead
    fn seek(&mut self, position: f64);
}

/// Collaborators bound to a channel when its stream starts.
pub struct ChannelBinding {
    pub channel: ChannelId,
    pub sink: Box<dyn MediaSink>,
    pub playback: Box<dyn PlaybackSource>,
}

impl ChannelBinding {
    pub fn new(
        channel: ChannelId,
        sink: impl MediaSink,
        playback: impl PlaybackSource,
    ) -> Self {
        Self { channel, sink: Box::new(sink), playback: Box::new(playback) }
    }
}

/// Counters reported once per metrics interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct ChannelStats {
    pub channel: ChannelId,
    /// Picture payloads fed to the sink
    pub frames_played: u32,
    /// Algorithm results received
    pub results_received: u32,
}

/// State of one active channel.
///
/// Dropping a channel destroys its sink and cancels its frame loop, so removing it from
/// the table is the whole of stream teardown.
pub struct Channel {
    id: ChannelId,
    pub(crate) epoch: Option<u64>,
    pub(crate) queue: ResultQueue,
    pub(crate) rate: f64,
    pub(crate) playback: Box<dyn PlaybackSource>,
    sink: Box<dyn MediaSink>,
    frames_played: u32,
    results_received: u32,
    frame_loop: CancellationToken,
}

impl Channel {
    fn new(binding: ChannelBinding, alignment: &AlignmentConfig, frame_loop: CancellationToken) -> Self {
        Self {
            id: binding.channel,
            epoch: None,
            queue: ResultQueue::new(alignment.window_us, alignment.prune_threshold),
            rate: NOMINAL_RATE,
            playback: binding.playback,
            sink: binding.sink,
            frames_played: 0,
            results_received: 0,
            frame_loop,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// First-seen frame timestamp of the current stream session
    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    /// Latch the epoch if unset. Returns whether this call set it.
    pub fn latch_epoch(&mut self, timestamp: u64) -> bool {
        if self.epoch.is_some() {
            return false;
        }
        info!("Channel {} epoch latched at {}", self.id, timestamp);
        self.epoch = Some(timestamp);
        true
    }

    /// Forward a payload to the sink, counting it as a picture when longer than
    /// `min_picture_len`. Returns whether it was counted.
    pub fn feed(&mut self, payload: Bytes, min_picture_len: usize) -> bool {
        let counted = payload.len() > min_picture_len;
        if counted {
            self.frames_played = self.frames_played.saturating_add(1);
        }
        self.sink.feed(payload);
        counted
    }

    /// Queue an algorithm result for alignment.
    pub fn push_result(&mut self, result: AlgorithmResult) {
        self.results_received = self.results_received.saturating_add(1);
        self.queue.push(result);
    }

    pub fn queued_results(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_current_loop(&self, token: &CancellationToken) -> bool {
        !token.is_cancelled() && !self.frame_loop.is_cancelled()
    }

    fn take_stats(&mut self) -> ChannelStats {
        let stats = ChannelStats {
            channel: self.id,
            frames_played: self.frames_played,
            results_received: self.results_received,
        };
        self.frames_played = 0;
        self.results_received = 0;
        stats
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        debug!("Tearing down channel {}", self.id);
        self.frame_loop.cancel();
        self.sink.destroy();
    }
}

/// Every active channel of the client, keyed by id.
pub struct ChannelTable {
    channels: BTreeMap<ChannelId, Channel>,
    alignment: AlignmentConfig,
}

/// Channel table shared by the driver, the frame loops and the client handle.
pub type SharedChannels = Arc<Mutex<ChannelTable>>;

impl ChannelTable {
    pub fn new(alignment: AlignmentConfig) -> Self {
        Self { channels: BTreeMap::new(), alignment }
    }

    pub fn shared(alignment: AlignmentConfig) -> SharedChannels {
        Arc::new(Mutex::new(Self::new(alignment)))
    }

    /// Start a fresh stream session for `binding.channel`.
    ///
    /// An existing session on the same channel is torn down first, so no epoch or queued
    /// result survives into the new session.
    pub fn activate(&mut self, binding: ChannelBinding, frame_loop: CancellationToken) {
        let id = binding.channel;
        if self.channels.remove(&id).is_some() {
            debug!("Channel {} restarted", id);
        }
        self.channels.insert(id, Channel::new(binding, &self.alignment, frame_loop));
        info!("Channel {} stream started", id);
    }

    /// Stop the stream session of `id`. Returns whether it was active.
    pub fn deactivate(&mut self, id: ChannelId) -> bool {
        let removed = self.channels.remove(&id).is_some();
        if removed {
            info!("Channel {} stream stopped", id);
        }
        removed
    }

    /// Stop every stream session. Returns how many were active.
    pub fn deactivate_all(&mut self) -> usize {
        let count = self.channels.len();
        self.channels.clear();
        if count > 0 {
            info!("Stopped {} channel streams", count);
        }
        count
    }

    pub fn is_active(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.channels.keys().copied().collect()
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    pub fn epoch(&self, id: ChannelId) -> Option<u64> {
        self.channels.get(&id).and_then(Channel::epoch)
    }

    /// Queue a result on its channel.
    pub fn push_result(&mut self, result: AlgorithmResult) -> Result<()> {
        let channel = result.channel;
        match self.channels.get_mut(&channel) {
            Some(state) => {
                trace!("Queued result for channel {} at {}", channel, result.timestamp);
                state.push_result(result);
                Ok(())
            }
            None => Err(ConsoleError::ChannelInactive { channel }),
        }
    }

    /// Read and reset every channel's counters.
    pub fn take_stats(&mut self) -> Vec<ChannelStats> {
        self.channels.values_mut().map(Channel::take_stats).collect()
    }
}
