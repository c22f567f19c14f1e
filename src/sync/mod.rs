//! Stream-to-metadata synchronization.
//!
//! Device clocks and the local video clock drift independently, so results cannot be
//! matched by wall time. Instead each channel latches the timestamp of its first frame
//! (the epoch) and, once per displayed frame:
//!
//! 1. [`PlaybackClock`] keeps buffering bounded by adjusting the playback rate (or
//!    skipping ahead) and converts the playhead into an absolute target timestamp;
//! 2. [`ResultQueue`] picks the queued result closest to that target within the
//!    alignment window, removes it, and sweeps results that can no longer match.

mod clock;
pub(crate) mod frame_loop;
mod queue;

pub use clock::{NOMINAL_RATE, PlaybackClock, RateController, RateDecision, target_timestamp};
pub use frame_loop::render_frame;
pub use queue::{DEFAULT_PRUNE_THRESHOLD, DEFAULT_WINDOW_US, ResultQueue};
