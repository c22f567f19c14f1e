//! Playback clock estimation and adaptive rate control

use tracing::{debug, trace};

use crate::channel::PlaybackSource;
use crate::config::PlaybackConfig;

/// Nominal playback rate.
pub const NOMINAL_RATE: f64 = 1.0;

/// Estimated capture timestamp (µs) of the frame on screen.
///
/// `position_secs` is measured from the same origin as the first received frame, whose
/// timestamp is `epoch`. Negative or NaN positions count as zero.
pub fn target_timestamp(position_secs: f64, epoch: u64) -> u64 {
    let offset = (position_secs * 1_000_000.0).floor();
    // float-to-int `as` saturates and maps NaN to 0
    epoch.saturating_add(offset as u64)
}

/// Outcome of one rate-control evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    /// Small gap: play at nominal speed
    Nominal,
    /// Moderate gap: play faster to drain the buffer
    CatchUp,
    /// Large gap: jump to the buffer's trailing edge
    Skip { to: f64 },
}

/// Chooses the playback rate from the gap between buffered media and the playhead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateController {
    nominal_gap: f64,
    skip_gap: f64,
    catch_up_rate: f64,
}

impl Default for RateController {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

impl RateController {
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            nominal_gap: config.nominal_gap_secs,
            skip_gap: config.skip_gap_secs,
            catch_up_rate: config.catch_up_rate,
        }
    }

    /// Evaluate the gap. Returns `None` when nothing is buffered yet.
    pub fn decide(&self, position: f64, buffered_end: Option<f64>) -> Option<RateDecision> {
        let end = buffered_end?;
        let gap = end - position;

        let decision = if gap <= self.nominal_gap {
            RateDecision::Nominal
        } else if gap < self.skip_gap {
            RateDecision::CatchUp
        } else {
            RateDecision::Skip { to: end }
        };
        Some(decision)
    }

    /// Playback rate to run at after `decision`.
    pub fn rate_for(&self, decision: RateDecision) -> f64 {
        match decision {
            RateDecision::CatchUp => self.catch_up_rate,
            RateDecision::Nominal | RateDecision::Skip { .. } => NOMINAL_RATE,
        }
    }
}

/// Per-frame clock for one channel: applies rate control, then estimates the target
/// timestamp from the (possibly adjusted) playhead.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackClock {
    controller: RateController,
}

impl PlaybackClock {
    pub fn new(controller: RateController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &RateController {
        &self.controller
    }

    /// Run one frame of rate control against `playback`.
    ///
    /// `current_rate` is the rate last pushed to the source; the source is only told
    /// about changes. Returns the target timestamp, or `None` until the channel's epoch
    /// has been latched.
    pub fn advance(
        &self,
        playback: &mut dyn PlaybackSource,
        current_rate: &mut f64,
        epoch: Option<u64>,
    ) -> Option<u64> {
        let position = playback.position();

        if let Some(decision) = self.controller.decide(position, playback.buffered_end()) {
            if let RateDecision::Skip { to } = decision {
                debug!("Buffer gap {:.2}s, skipping playhead to {:.3}s", to - position, to);
                playback.seek(to);
            }

            let rate = self.controller.rate_for(decision);
            if rate != *current_rate {
                trace!("Playback rate {} -> {}", current_rate, rate);
                playback.set_rate(rate);
                *current_rate = rate;
            }
        }

        Some(target_timestamp(playback.position(), epoch?))
    }
}
