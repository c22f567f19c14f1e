//! Client configuration
//!
//! Every knob has a default matching the device's reference console, so an empty YAML
//! document yields a working configuration:
//!
//! ```rust
//! use sightline::ClientConfig;
//!
//! let config = ClientConfig::from_yaml_str(
//!     r#"
//! connection:
//!   url: ws://192.168.1.10:4567
//!   reconnect_attempts: 5
//! alignment:
//!   window_us: 80000
//! "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.connection.reconnect_attempts, 5);
//! assert_eq!(config.connection.heartbeat_interval_ms, 5000);
//! assert_eq!(config.alignment.prune_threshold, 30);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::{ConsoleError, Result};

/// Top-level client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub alignment: AlignmentConfig,
    pub playback: PlaybackConfig,
    pub demux: DemuxConfig,
    pub metrics: MetricsConfig,
}

/// Link lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Device websocket address, `ws://host:port` or `wss://host:port`
    pub url: Option<String>,

    /// Keep-alive period while the link is open
    pub heartbeat_interval_ms: u64,

    /// Delay before each reconnect attempt
    pub reconnect_interval_ms: u64,

    /// Reconnect attempts before the link is declared lost
    pub reconnect_attempts: u32,

    /// Delay between retries of a send issued while the socket is not open
    pub send_retry_delay_ms: u64,

    /// Sends held while the socket is not open; the oldest is dropped beyond this
    pub max_pending_sends: usize,

    /// Declare the socket dead when nothing arrives for this long (checked on heartbeat)
    pub idle_timeout_ms: Option<u64>,

    /// How long a socket may stay open after the device announced its disconnect
    pub close_grace_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: None,
            heartbeat_interval_ms: 5000,
            reconnect_interval_ms: 3000,
            reconnect_attempts: 3,
            send_retry_delay_ms: 200,
            max_pending_sends: 256,
            idle_timeout_ms: None,
            close_grace_ms: 5000,
        }
    }
}

impl ConnectionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn send_retry_delay(&self) -> Duration {
        Duration::from_millis(self.send_retry_delay_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Result alignment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Largest distance between a result and the target timestamp that still matches
    pub window_us: u64,

    /// Queue length above which stale results are swept
    pub prune_threshold: usize,

    /// Display refresh cadence driving the per-channel frame loop
    pub frame_rate_hz: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self { window_us: 100_000, prune_threshold: 30, frame_rate_hz: 60.0 }
    }
}

impl AlignmentConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate_hz)
    }
}

/// Adaptive playback-rate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Buffer gap at or below which playback runs at nominal speed
    pub nominal_gap_secs: f64,

    /// Buffer gap at or above which playback jumps to the buffer's trailing edge
    pub skip_gap_secs: f64,

    /// Playback rate used between the two thresholds
    pub catch_up_rate: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { nominal_gap_secs: 0.3, skip_gap_secs: 5.0, catch_up_rate: 1.2 }
    }
}

/// Binary frame accounting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// Payloads must be longer than this to count as a played picture.
    /// Parameter-set NAL units (SPS ~25 bytes, PPS ~33 bytes) stay below it.
    pub min_picture_len: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self { min_picture_len: 33 }
    }
}

/// Periodic per-channel statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

impl MetricsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl ClientConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ClientConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ConsoleError::file_error(path.to_path_buf(), e))?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_str(&yaml)
    }

    /// Check every value is usable by the driver.
    pub fn validate(&self) -> Result<()> {
        let connection = &self.connection;
        if let Some(url) = &connection.url {
            validate_url(url)?;
        }
        for (name, value) in [
            ("heartbeat_interval_ms", connection.heartbeat_interval_ms),
            ("reconnect_interval_ms", connection.reconnect_interval_ms),
            ("send_retry_delay_ms", connection.send_retry_delay_ms),
            ("close_grace_ms", connection.close_grace_ms),
            ("metrics.interval_ms", self.metrics.interval_ms),
        ] {
            if value == 0 {
                return Err(ConsoleError::config(format!("{name} must be positive")));
            }
        }
        if connection.idle_timeout_ms == Some(0) {
            return Err(ConsoleError::config("idle_timeout_ms must be positive when set"));
        }
        if connection.max_pending_sends == 0 {
            return Err(ConsoleError::config("max_pending_sends must be positive"));
        }

        let rate = self.alignment.frame_rate_hz;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConsoleError::config(format!("frame_rate_hz {rate} must be positive")));
        }

        let playback = &self.playback;
        if !(playback.nominal_gap_secs >= 0.0 && playback.nominal_gap_secs < playback.skip_gap_secs)
        {
            return Err(ConsoleError::config(format!(
                "nominal_gap_secs ({}) must be non-negative and below skip_gap_secs ({})",
                playback.nominal_gap_secs, playback.skip_gap_secs
            )));
        }
        if !playback.catch_up_rate.is_finite() || playback.catch_up_rate <= 0.0 {
            return Err(ConsoleError::config(format!(
                "catch_up_rate {} must be positive",
                playback.catch_up_rate
            )));
        }

        Ok(())
    }
}

/// Check a device address uses a websocket scheme.
pub fn validate_url(url: &str) -> Result<()> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(ConsoleError::config(format!("url '{url}' must start with ws:// or wss://")))
    }
}
