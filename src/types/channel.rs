//! Channel identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one independent video pipeline on the device.
///
/// Ids are small non-negative integers assigned by the device and stay stable for the
/// lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct ChannelId(u32);

impl ChannelId {
    /// Create a channel id
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw id as carried on the wire
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for ChannelId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
