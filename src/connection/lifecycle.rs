//! Connection lifecycle state machine
//!
//! Pure bookkeeping with no I/O: the driver feeds it transport outcomes and acts on what
//! it returns. Every socket is tagged with a generation so late events from a released
//! socket can be recognised and ignored.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ConnectionConfig;

/// Observable state of the device link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum ConnectionState {
    /// No socket. A reconnect may be scheduled.
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Socket open, heartbeat running
    Open,
    /// The device announced it is about to close the socket
    Closing,
}

/// Why the link stopped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    UserClosed,
    Superseded,
    LinkLost,
}

/// What the driver should do after a socket went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Event from an already released socket
    Stale,
    /// Never opened, so not eligible for automatic reconnect
    Idle,
    /// Schedule reconnect attempt number `attempt` after `delay`
    Reconnect { attempt: u32, delay: Duration },
    /// Reconnect budget exhausted
    LinkLost { attempts: u32 },
    /// Terminated before the close
    Stopped(Termination),
}

/// Fixed-delay, bounded reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self { interval: config.reconnect_interval(), max_attempts: config.reconnect_attempts }
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    state: ConnectionState,
    generation: u64,
    auto_reconnect: bool,
    attempts: u32,
    termination: Option<Termination>,
    policy: ReconnectPolicy,
}

impl Lifecycle {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            generation: 0,
            auto_reconnect: false,
            attempts: 0,
            termination: None,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    /// Whether pending work should be abandoned rather than retried.
    pub fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }

    /// Whether `generation` names the live socket.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && self.state != ConnectionState::Disconnected
    }

    /// Start a new socket. Returns its generation, or `None` while one already exists.
    ///
    /// Starting from a terminated link is an explicit restart and resets the attempt budget.
    pub fn begin_connect(&mut self) -> Option<u64> {
        if self.state != ConnectionState::Disconnected {
            return None;
        }
        if self.termination.take().is_some() {
            self.attempts = 0;
        }
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        Some(self.generation)
    }

    /// The socket of `generation` finished its handshake. Returns whether it is current.
    pub fn opened(&mut self, generation: u64) -> bool {
        if self.state != ConnectionState::Connecting || generation != self.generation {
            return false;
        }
        self.state = ConnectionState::Open;
        self.auto_reconnect = true;
        self.attempts = 0;
        true
    }

    /// The device announced an imminent close. Returns whether the state changed.
    pub fn server_closing(&mut self) -> bool {
        if self.state != ConnectionState::Open {
            return false;
        }
        self.state = ConnectionState::Closing;
        true
    }

    /// Another client took over the session.
    pub fn superseded(&mut self) {
        self.auto_reconnect = false;
        self.termination = Some(Termination::Superseded);
    }

    /// The application closed the link. Returns whether a socket must be released.
    pub fn user_close(&mut self) -> bool {
        self.termination = Some(Termination::UserClosed);
        self.state != ConnectionState::Disconnected
    }

    /// The socket of `generation` closed, failed, or never connected.
    pub fn closed(&mut self, generation: u64) -> CloseOutcome {
        if !self.is_current(generation) {
            return CloseOutcome::Stale;
        }
        self.state = ConnectionState::Disconnected;

        if let Some(termination) = self.termination {
            return CloseOutcome::Stopped(termination);
        }
        if !self.auto_reconnect {
            return CloseOutcome::Idle;
        }
        if self.attempts >= self.policy.max_attempts {
            self.termination = Some(Termination::LinkLost);
            return CloseOutcome::LinkLost { attempts: self.attempts };
        }

        self.attempts += 1;
        CloseOutcome::Reconnect { attempt: self.attempts, delay: self.policy.interval }
    }
}
