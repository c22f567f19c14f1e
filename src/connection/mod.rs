//! Client handle and link lifecycle

mod client;
pub mod lifecycle;
pub mod router;

#[cfg(test)]
mod tests;

pub use client::TransportClient;
pub use lifecycle::{CloseOutcome, ConnectionState, Lifecycle, ReconnectPolicy, Termination};
pub use router::{Routed, route_text};
