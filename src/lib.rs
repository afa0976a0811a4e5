//! filecoffee-core - peer-to-peer file transfer over WebRTC
//!
//! Two peers meet in a room on a WebSocket relay, negotiate a WebRTC data
//! channel through it and then move the file directly, chunk by chunk, with
//! buffer backpressure on the sending side and progress acks from the
//! receiver.

pub mod client;
pub mod config;
pub mod transfer;
pub mod transport;
pub mod webrtc;

// Re-exports
pub use client::{run_receive, run_send, ClientError, ReceiveOptions, SendOptions};
pub use config::{Config, WebRTCConfig};
pub use webrtc::{PeerState, Role, SessionEvent};
