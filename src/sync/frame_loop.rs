//! Per-channel frame loop driving clock estimation and result alignment

use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::PlaybackClock;
use crate::channel::{Channel, SharedChannels};
use crate::events::{ClientEvent, EventSender};
use crate::types::{AlgorithmResult, ChannelId};

/// Run one displayed frame for `channel`: rate control, target estimation, alignment.
///
/// Returns the result to render on this frame, if any.
pub fn render_frame(channel: &mut Channel, clock: &PlaybackClock) -> Option<AlgorithmResult> {
    let target = clock.advance(channel.playback.as_mut(), &mut channel.rate, channel.epoch)?;
    let matched = channel.queue.align(target);
    if let Some(result) = &matched {
        trace!(
            "Channel {} target {} matched result at {}",
            channel.id(),
            target,
            result.timestamp
        );
    }
    matched
}

/// Spawn the repeating frame task for one channel.
///
/// The task stops when `cancel` fires (stream stop, restart, client drop) or when the
/// channel disappears from the table.
pub(crate) fn spawn(
    channel: ChannelId,
    channels: SharedChannels,
    clock: PlaybackClock,
    events: EventSender,
    period: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        run(channel, channels, clock, events, period, cancel).await;
    });
}

async fn run(
    channel: ChannelId,
    channels: SharedChannels,
    clock: PlaybackClock,
    events: EventSender,
    period: Duration,
    cancel: CancellationToken,
) {
    debug!("Frame loop started for channel {}", channel);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let matched = {
            let mut table = channels.lock();
            match table.get_mut(channel) {
                // a restarted channel carries a new token; this loop must not touch it
                Some(state) if state.is_current_loop(&cancel) => render_frame(state, &clock),
                _ => break,
            }
        };

        if let Some(result) = matched {
            events.emit(ClientEvent::from(result));
        }
    }

    debug!("Frame loop stopped for channel {}", channel);
}
