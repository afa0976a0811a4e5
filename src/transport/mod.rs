//! Transport layer for filecoffee
//!
//! The WebSocket connection to the relay and the relay's small HTTP API.

pub mod relay_api;
pub mod websocket;

pub use relay_api::{IceServerSource, RelayApi, RoomStatus};
pub use websocket::{SignalingSender, SignalingTransport, TransportEvent};

use std::error::Error;
use std::fmt;

/// Relay communication errors
#[derive(Debug)]
pub enum SignalingError {
    /// WebSocket connection could not be established
    ConnectFailed(String),
    /// Connection attempt or request exceeded its timeout
    Timeout(String),
    /// WebSocket closed; no further messages can be sent
    Closed,
    /// Message could not be encoded or decoded
    Protocol(String),
    /// HTTP call to the relay API failed
    Http(String),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::ConnectFailed(msg) => write!(f, "Signaling connect failed: {}", msg),
            SignalingError::Timeout(msg) => write!(f, "Signaling timeout: {}", msg),
            SignalingError::Closed => write!(f, "Signaling connection closed"),
            SignalingError::Protocol(msg) => write!(f, "Signaling protocol error: {}", msg),
            SignalingError::Http(msg) => write!(f, "Relay API error: {}", msg),
        }
    }
}

impl Error for SignalingError {}
