//! Relay signaling protocol
//!
//! JSON messages exchanged with the relay over the WebSocket, plus the
//! offer/answer/candidate payload carried opaquely inside `Signal`.

use crate::transport::SignalingError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Error codes the relay attaches to `Error` messages
pub mod error_codes {
    pub const ROOM_NOT_FOUND: &str = "ROOM_NOT_FOUND";
    pub const INVALID_PASSWORD: &str = "INVALID_PASSWORD";
    pub const ROOM_FULL: &str = "ROOM_FULL";
    pub const NOT_IN_ROOM: &str = "NOT_IN_ROOM";
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
}

/// Messages sent from this client to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Open a new room, optionally password protected
    CreateRoom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    /// Join an existing room
    JoinRoom {
        #[serde(alias = "roomId")]
        room_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    /// Opaque negotiation payload forwarded to the other peer
    Signal {
        data: Value,
    },

    /// Heartbeat
    Ping,
}

/// Messages sent from the relay to this client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    RoomCreated {
        #[serde(alias = "roomId")]
        room_id: String,
    },
    RoomJoined,
    PeerJoined {
        #[serde(default)]
        peer_count: usize,
    },
    PeerLeft {
        #[serde(default)]
        peer_count: usize,
    },
    Signal {
        data: Value,
    },
    Error {
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
    RoomExists {
        exists: bool,
        #[serde(alias = "hasPassword")]
        has_password: bool,
    },
    Pong,
}

impl ClientMessage {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self)
            .map_err(|e| SignalingError::Protocol(format!("Failed to serialize message: {}", e)))
    }

    /// Wrap a negotiation payload for the relay
    pub fn signal(signal: &NegotiationSignal) -> Result<Self, SignalingError> {
        Ok(ClientMessage::Signal { data: signal.to_value()? })
    }
}

impl ServerMessage {
    /// Parse a relay message from JSON
    pub fn from_json(json: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(json)
            .map_err(|e| SignalingError::Protocol(format!("Invalid signaling message: {}", e)))
    }

    /// Message kind as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::RoomCreated { .. } => "RoomCreated",
            ServerMessage::RoomJoined => "RoomJoined",
            ServerMessage::PeerJoined { .. } => "PeerJoined",
            ServerMessage::PeerLeft { .. } => "PeerLeft",
            ServerMessage::Signal { .. } => "Signal",
            ServerMessage::Error { .. } => "Error",
            ServerMessage::RoomExists { .. } => "RoomExists",
            ServerMessage::Pong => "Pong",
        }
    }
}

/// Negotiation payload carried inside `Signal.data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NegotiationSignal {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidate },
}

impl NegotiationSignal {
    pub fn from_value(value: &Value) -> Result<Self, SignalingError> {
        serde_json::from_value(value.clone())
            .map_err(|e| SignalingError::Protocol(format!("Invalid negotiation payload: {}", e)))
    }

    pub fn to_value(&self) -> Result<Value, SignalingError> {
        serde_json::to_value(self)
            .map_err(|e| SignalingError::Protocol(format!("Failed to serialize negotiation payload: {}", e)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NegotiationSignal::Offer { .. } => "offer",
            NegotiationSignal::Answer { .. } => "answer",
            NegotiationSignal::Candidate { .. } => "candidate",
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}
