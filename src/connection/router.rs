//! Inbound text routing

use crate::Result;
use crate::types::{InboundMessage, kinds};

/// Where an inbound text message goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// `kind` 110: the device is about to close the socket
    ServerClosing,
    /// `kind` 99: another client replaced this session
    Superseded,
    /// Everything else, for the application
    Application(InboundMessage),
}

/// Parse and classify one text message.
pub fn route_text(text: &str) -> Result<Routed> {
    let message = InboundMessage::parse(text)?;
    let routed = match message.kind() {
        Some(kinds::SERVER_DISCONNECT) => Routed::ServerClosing,
        Some(kinds::SUPERSEDED) => Routed::Superseded,
        _ => Routed::Application(message),
    };
    Ok(routed)
}
