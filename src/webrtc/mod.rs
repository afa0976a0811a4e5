//! WebRTC peer connection handling
//!
//! This module provides the peer side of a file transfer:
//! - Relay signaling schema
//! - ICE candidate queueing
//! - Peer connection and data channel setup
//! - Offer/answer negotiation and per-role message routing

pub mod candidate_queue;
pub mod data_channel;
pub mod negotiation;
pub mod peer_connection;
pub mod router;
pub mod session;
pub mod signaling;

pub use candidate_queue::CandidateQueue;
pub use data_channel::DataChannelLink;
pub use peer_connection::PeerConnectionManager;
pub use router::{AnswererRouter, MessageRouter, OffererRouter};
pub use session::{PeerEvent, PeerState, Role, SessionContext, SessionEvent};
pub use signaling::{ClientMessage, IceCandidate, NegotiationSignal, ServerMessage};

use std::error::Error;
use std::fmt;

/// Peer connection errors
#[derive(Debug)]
pub enum PeerError {
    /// Peer connection creation failed
    ConnectionFailed(String),
    /// SDP processing failed
    SdpError(String),
    /// ICE candidate processing failed
    IceError(String),
    /// Data channel error
    DataChannelError(String),
    /// Invalid state transition
    InvalidState(String),
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            PeerError::SdpError(msg) => write!(f, "SDP error: {}", msg),
            PeerError::IceError(msg) => write!(f, "ICE error: {}", msg),
            PeerError::DataChannelError(msg) => write!(f, "DataChannel error: {}", msg),
            PeerError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl Error for PeerError {}
