//! File transfer protocol over the data channel
//!
//! Text frames carry JSON control messages (metadata, progress); binary
//! frames carry raw file chunks in offset order.

pub mod receiver;
pub mod sender;

pub use receiver::{FileReceiver, ReceiveState, ReceivedFile, ReceiverEvent};
pub use sender::{AckTracker, AckUpdate, ChunkSink, FileSender, OutgoingFile};

use crate::config::TransferConfig;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// One inbound data channel frame
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelPayload {
    Text(String),
    Binary(Bytes),
}

/// JSON control messages on the data channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelMessage {
    Metadata {
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "fileSize")]
        file_size: u64,
        #[serde(rename = "fileType", default)]
        file_type: String,
    },
    Progress {
        percent: u8,
    },
}

impl ChannelMessage {
    pub fn to_json(&self) -> Result<String, TransferError> {
        serde_json::to_string(self)
            .map_err(|e| TransferError::SendFailed(format!("Failed to serialize channel message: {}", e)))
    }

    pub fn progress(percent: u8) -> Self {
        ChannelMessage::Progress { percent }
    }
}

/// Description of the file being transferred
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl FileMetadata {
    pub fn to_message(&self) -> ChannelMessage {
        ChannelMessage::Metadata {
            file_name: self.name.clone(),
            file_size: self.size,
            file_type: self.mime_type.clone(),
        }
    }
}

/// Transfer-related errors
#[derive(Debug)]
pub enum TransferError {
    /// Metadata text could not be interpreted
    MalformedMetadata(String),
    /// The data channel closed before the transfer finished
    ChannelClosed,
    /// Local file I/O failed
    Io(std::io::Error),
    /// The data channel rejected a frame
    SendFailed(String),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::MalformedMetadata(msg) => write!(f, "Malformed metadata: {}", msg),
            TransferError::ChannelClosed => write!(f, "Data channel closed"),
            TransferError::Io(e) => write!(f, "I/O error: {}", e),
            TransferError::SendFailed(msg) => write!(f, "Send failed: {}", msg),
        }
    }
}

impl Error for TransferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransferError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Io(e)
    }
}

/// Chunking and flow-control knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    pub chunk_size: usize,
    pub high_water_mark: usize,
    pub low_water_mark: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for TransferSettings {
    fn from(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            high_water_mark: config.high_water_mark,
            low_water_mark: config.low_water_mark,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_metadata_wire_shape() {
        let meta = FileMetadata {
            name: "x.bin".to_string(),
            size: 1_048_576,
            mime_type: "application/octet-stream".to_string(),
        };
        let value: Value = serde_json::from_str(&meta.to_message().to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "metadata",
                "fileName": "x.bin",
                "fileSize": 1048576,
                "fileType": "application/octet-stream"
            })
        );
    }

    #[test]
    fn test_progress_wire_shape() {
        let json = ChannelMessage::progress(42).to_json().unwrap();
        assert_eq!(json, r#"{"type":"progress","percent":42}"#);
    }

    #[test]
    fn test_default_settings_follow_config() {
        let settings = TransferSettings::default();
        assert_eq!(settings.chunk_size, 256 * 1024);
        assert!(settings.low_water_mark < settings.high_water_mark);
    }
}
