//! Error types for the device link and synchronization runtime.
//!
//! All errors implement the `std::error::Error` trait and carry structured context
//! for logging and recovery guidance.
//!
//! ## Error Categories
//!
//! - **Link Errors**: handshake failures, socket errors, idle timeouts
//! - **Message Errors**: truncated binary frames, undecodable JSON
//! - **Configuration Errors**: invalid or unreadable client configuration
//! - **Lifecycle Errors**: operations on a shut-down client
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use sightline::ConsoleError;
//!
//! let error = ConsoleError::connection_failed("ws://10.0.0.2:4567", "connection refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```
//!
//! Message errors are contained to the offending message: the connection driver logs
//! them and keeps going.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::ChannelId;

/// Result type alias for runtime operations.
pub type Result<T, E = ConsoleError> = std::result::Result<T, E>;

/// Main error type for the runtime.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConsoleError {
    #[error("Failed to connect to {url}: {reason}")]
    Connection {
        url: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Transport error: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Binary frame of {len} bytes is shorter than the {required}-byte header")]
    Framing { len: usize, required: usize },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Configuration file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Channel {channel} has no active stream")]
    ChannelInactive { channel: ChannelId },

    #[error("No inbound traffic for {duration:?}")]
    Timeout { duration: Duration },

    #[error("Client has been shut down")]
    Closed,
}

impl ConsoleError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConsoleError::Connection { .. } => true,
            ConsoleError::Transport { .. } => true,
            ConsoleError::Timeout { .. } => true,
            ConsoleError::Framing { .. } => false,
            ConsoleError::Parse { .. } => false,
            ConsoleError::Config { .. } => false,
            ConsoleError::File { .. } => false,
            ConsoleError::ChannelInactive { .. } => false,
            ConsoleError::Closed => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            ConsoleError::Connection { .. } => vec![
                "Check the device is powered and reachable",
                "Verify the websocket host and port",
                "Check no firewall blocks the websocket port",
            ],
            ConsoleError::Transport { .. } => vec![
                "Check network stability between console and device",
                "Wait for the automatic reconnect to complete",
            ],
            ConsoleError::Framing { .. } => vec![
                "Check the device firmware sends the 12-byte frame header",
                "Verify the console and device protocol versions match",
            ],
            ConsoleError::Parse { .. } => vec![
                "Check the message is valid JSON",
                "Verify the console and device protocol versions match",
            ],
            ConsoleError::Config { .. } => vec![
                "Review the configuration values against their documented ranges",
                "Remove the offending key to fall back to its default",
            ],
            ConsoleError::File { .. } => vec![
                "Check the configuration file exists and is readable",
                "Check file permissions",
            ],
            ConsoleError::ChannelInactive { .. } => vec![
                "Start the stream for this channel before feeding it",
                "Check the channel id reported by the device",
            ],
            ConsoleError::Timeout { .. } => vec![
                "Increase the idle timeout",
                "Check the device is still producing traffic",
            ],
            ConsoleError::Closed => vec!["Construct a new client"],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        ConsoleError::Connection { url: url.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        url: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        ConsoleError::Connection { url: url.into(), reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for socket-level failures.
    pub fn transport(reason: impl Into<String>) -> Self {
        ConsoleError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for truncated binary frames.
    pub fn framing(len: usize, required: usize) -> Self {
        ConsoleError::Framing { len, required }
    }

    /// Helper constructor for parse errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        ConsoleError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        ConsoleError::Config { reason: reason.into() }
    }

    /// Helper constructor for configuration file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        ConsoleError::File { path, source }
    }
}

impl From<std::io::Error> for ConsoleError {
    fn from(err: std::io::Error) -> Self {
        ConsoleError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

impl From<serde_json::Error> for ConsoleError {
    fn from(err: serde_json::Error) -> Self {
        ConsoleError::parse("JSON message", err.to_string())
    }
}

impl From<serde_yaml_ng::Error> for ConsoleError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        ConsoleError::parse("YAML configuration", err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConsoleError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ConsoleError::Transport { reason: err.to_string(), source: Some(Box::new(err)) }
    }
}
