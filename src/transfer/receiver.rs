//! Receive path: metadata handshake, chunk reassembly and progress acks.

use super::{ChannelMessage, ChannelPayload, FileMetadata, TransferError};
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    /// No metadata yet; binary frames are dropped
    AwaitingMetadata,
    /// Collecting chunks for the announced file
    Receiving,
    /// All announced bytes arrived
    Complete,
    /// Metadata could not be interpreted
    Failed,
}

/// Things the caller must act on after feeding a frame
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverEvent {
    /// A new file was announced; any earlier transfer state is gone
    IncomingFile(FileMetadata),
    /// Send a progress acknowledgment with this percent
    Progress(u8),
    /// The artifact is complete
    Complete(ReceivedFile),
}

/// A fully reassembled file
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFile {
    pub metadata: FileMetadata,
    pub data: Bytes,
}

impl ReceivedFile {
    /// Write the artifact into `dir` under a sanitised name, never
    /// overwriting an existing file. Returns the path written.
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf, TransferError> {
        tokio::fs::create_dir_all(dir).await?;
        let base = sanitize_file_name(&self.metadata.name);

        for attempt in 0..1000u32 {
            let path = dir.join(numbered_name(&base, attempt));
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match file {
                Ok(mut file) => {
                    file.write_all(&self.data).await?;
                    file.flush().await?;
                    info!("Saved {} bytes to {:?}", self.data.len(), path);
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(TransferError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("No free file name for {} in {:?}", base, dir),
        )))
    }
}

pub struct FileReceiver {
    state: ReceiveState,
    metadata: Option<FileMetadata>,
    chunks: Vec<Bytes>,
    received_bytes: u64,
    last_reported_percent: u8,
}

impl Default for FileReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl FileReceiver {
    pub fn new() -> Self {
        Self {
            state: ReceiveState::AwaitingMetadata,
            metadata: None,
            chunks: Vec::new(),
            received_bytes: 0,
            last_reported_percent: 0,
        }
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    pub fn metadata(&self) -> Option<&FileMetadata> {
        self.metadata.as_ref()
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    pub fn last_reported_percent(&self) -> u8 {
        self.last_reported_percent
    }

    /// Discard everything and wait for the next metadata message.
    pub fn reset(&mut self) {
        self.state = ReceiveState::AwaitingMetadata;
        self.metadata = None;
        self.chunks.clear();
        self.received_bytes = 0;
        self.last_reported_percent = 0;
    }

    pub fn handle_payload(&mut self, payload: ChannelPayload) -> Result<Vec<ReceiverEvent>, TransferError> {
        match payload {
            ChannelPayload::Text(text) => self.handle_text(&text),
            ChannelPayload::Binary(data) => Ok(self.handle_binary(data)),
        }
    }

    /// Handle a text frame.
    ///
    /// Text that is not JSON, or claims to be metadata but does not parse,
    /// fails the transfer. Other well-formed JSON is dropped.
    pub fn handle_text(&mut self, text: &str) -> Result<Vec<ReceiverEvent>, TransferError> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => return Err(self.fail(format!("not JSON: {}", e))),
        };

        match value.get("type").and_then(Value::as_str) {
            Some("metadata") => {}
            Some("progress") => {
                debug!("Ignoring progress message on receive side");
                return Ok(Vec::new());
            }
            other => {
                warn!("Dropping unknown data channel message type {:?}", other);
                return Ok(Vec::new());
            }
        }

        let metadata = match serde_json::from_value::<ChannelMessage>(value) {
            Ok(ChannelMessage::Metadata { file_name, file_size, file_type }) => FileMetadata {
                name: file_name,
                size: file_size,
                mime_type: file_type,
            },
            Ok(_) => return Ok(Vec::new()),
            Err(e) => return Err(self.fail(e.to_string())),
        };

        if self.state == ReceiveState::Receiving {
            info!(
                "New metadata mid-transfer; discarding {} buffered bytes",
                self.received_bytes
            );
        }
        self.reset();
        self.state = ReceiveState::Receiving;
        self.metadata = Some(metadata.clone());
        info!("Incoming file {} ({} bytes, {})", metadata.name, metadata.size, metadata.mime_type);

        let mut events = vec![ReceiverEvent::IncomingFile(metadata)];
        events.extend(self.check_progress());
        Ok(events)
    }

    /// Handle a binary chunk
    pub fn handle_binary(&mut self, data: Bytes) -> Vec<ReceiverEvent> {
        match self.state {
            ReceiveState::Receiving => {}
            ReceiveState::AwaitingMetadata | ReceiveState::Failed => {
                warn!("Dropping {} byte chunk received before metadata", data.len());
                return Vec::new();
            }
            ReceiveState::Complete => {
                warn!("Dropping {} byte chunk received after completion", data.len());
                return Vec::new();
            }
        }

        self.received_bytes = self.received_bytes.saturating_add(data.len() as u64);
        self.chunks.push(data);
        self.check_progress()
    }

    fn check_progress(&mut self) -> Vec<ReceiverEvent> {
        let Some(expected) = self.metadata.as_ref().map(|m| m.size) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let percent = progress_percent(self.received_bytes, expected);
        if percent > self.last_reported_percent {
            self.last_reported_percent = percent;
            events.push(ReceiverEvent::Progress(percent));
        }

        if self.received_bytes >= expected {
            if self.received_bytes > expected {
                warn!(
                    "Received {} bytes, {} more than announced",
                    self.received_bytes,
                    self.received_bytes - expected
                );
            }
            if let Some(metadata) = self.metadata.clone() {
                events.push(ReceiverEvent::Complete(self.assemble(metadata)));
            }
        }
        events
    }

    fn assemble(&mut self, metadata: FileMetadata) -> ReceivedFile {
        let mut data = BytesMut::with_capacity(self.received_bytes as usize);
        for chunk in self.chunks.drain(..) {
            data.extend_from_slice(&chunk);
        }
        self.state = ReceiveState::Complete;
        ReceivedFile {
            metadata,
            data: data.freeze(),
        }
    }

    fn fail(&mut self, reason: String) -> TransferError {
        warn!("Malformed metadata, failing transfer: {}", reason);
        self.reset();
        self.state = ReceiveState::Failed;
        TransferError::MalformedMetadata(reason)
    }
}

/// `floor(received / expected * 100)`, capped at 100. An empty file is 100%.
fn progress_percent(received: u64, expected: u64) -> u8 {
    if expected == 0 {
        return 100;
    }
    let percent = (received as u128 * 100) / expected as u128;
    percent.min(100) as u8
}

fn sanitize_file_name(name: &str) -> String {
    let normalized = name.replace('\\', "/");
    let candidate = Path::new(&normalized)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .last()
        .unwrap_or("")
        .trim();

    if candidate.is_empty() || candidate == "." || candidate == ".." {
        "download".to_string()
    } else {
        candidate.to_string()
    }
}

fn numbered_name(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        return base.to_string();
    }
    match base.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({}){}", &base[..dot], attempt, &base[dot..]),
        _ => format!("{} ({})", base, attempt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_json(name: &str, size: u64) -> String {
        format!(
            r#"{{"type":"metadata","fileName":"{}","fileSize":{},"fileType":"application/octet-stream"}}"#,
            name, size
        )
    }

    fn progress_of(events: &[ReceiverEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                ReceiverEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_metadata_starts_transfer() {
        let mut receiver = FileReceiver::new();
        let events = receiver.handle_text(&metadata_json("x.bin", 10)).unwrap();
        assert_eq!(receiver.state(), ReceiveState::Receiving);
        match &events[0] {
            ReceiverEvent::IncomingFile(meta) => {
                assert_eq!(meta.name, "x.bin");
                assert_eq!(meta.size, 10);
            }
            other => panic!("Expected IncomingFile, got {:?}", other),
        }
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_progress_strictly_increases_and_completes() {
        let mut receiver = FileReceiver::new();
        receiver.handle_text(&metadata_json("x.bin", 1000)).unwrap();

        let mut reported = Vec::new();
        let mut completed = None;
        // Uneven chunk sizes, several mapping to the same percent.
        for size in [3usize, 4, 3, 90, 400, 1, 1, 498] {
            for event in receiver.handle_binary(Bytes::from(vec![7u8; size])) {
                match event {
                    ReceiverEvent::Progress(p) => reported.push(p),
                    ReceiverEvent::Complete(file) => completed = Some(file),
                    ReceiverEvent::IncomingFile(_) => panic!("unexpected metadata event"),
                }
            }
        }

        assert!(reported.windows(2).all(|w| w[0] < w[1]), "{:?}", reported);
        assert!(reported.iter().all(|p| *p <= 100));
        assert_eq!(reported.last(), Some(&100));
        assert_eq!(reported, vec![1, 10, 50, 100]);
        let file = completed.expect("transfer should complete");
        assert_eq!(file.data.len(), 1000);
        assert_eq!(receiver.state(), ReceiveState::Complete);
    }

    #[test]
    fn test_zero_byte_file_completes_immediately() {
        let mut receiver = FileReceiver::new();
        let events = receiver.handle_text(&metadata_json("empty.txt", 0)).unwrap();
        assert_eq!(progress_of(&events), vec![100]);
        match events.last() {
            Some(ReceiverEvent::Complete(file)) => assert!(file.data.is_empty()),
            other => panic!("Expected Complete, got {:?}", other),
        }
        assert_eq!(receiver.state(), ReceiveState::Complete);
    }

    #[test]
    fn test_second_metadata_resets_counters() {
        let mut receiver = FileReceiver::new();
        receiver.handle_text(&metadata_json("a.bin", 100)).unwrap();
        receiver.handle_binary(Bytes::from(vec![1u8; 60]));
        assert_eq!(receiver.last_reported_percent(), 60);

        receiver.handle_text(&metadata_json("b.bin", 10)).unwrap();
        assert_eq!(receiver.received_bytes(), 0);
        assert_eq!(receiver.last_reported_percent(), 0);
        assert_eq!(receiver.metadata().map(|m| m.name.as_str()), Some("b.bin"));

        let events = receiver.handle_binary(Bytes::from(vec![2u8; 10]));
        assert_eq!(progress_of(&events), vec![100]);
        match events.last() {
            Some(ReceiverEvent::Complete(file)) => {
                assert_eq!(file.metadata.name, "b.bin");
                assert_eq!(&file.data[..], &[2u8; 10][..]);
            }
            other => panic!("Expected Complete, got {:?}", other),
        }
    }

    #[test]
    fn test_binary_before_metadata_is_dropped() {
        let mut receiver = FileReceiver::new();
        assert!(receiver.handle_binary(Bytes::from_static(b"early")).is_empty());
        assert_eq!(receiver.received_bytes(), 0);
        assert_eq!(receiver.state(), ReceiveState::AwaitingMetadata);
    }

    #[test]
    fn test_malformed_metadata_fails_transfer() {
        let mut receiver = FileReceiver::new();
        receiver.handle_text(&metadata_json("a.bin", 100)).unwrap();
        receiver.handle_binary(Bytes::from(vec![1u8; 10]));

        let err = receiver
            .handle_text(r#"{"type":"metadata","fileName":"a.bin","fileSize":-5}"#)
            .unwrap_err();
        assert!(matches!(err, TransferError::MalformedMetadata(_)));
        assert_eq!(receiver.state(), ReceiveState::Failed);
        assert_eq!(receiver.received_bytes(), 0);
        assert!(receiver.handle_binary(Bytes::from(vec![1u8; 10])).is_empty());

        assert!(receiver.handle_text("{not json").is_err());
    }

    #[test]
    fn test_unknown_text_is_dropped() {
        let mut receiver = FileReceiver::new();
        receiver.handle_text(&metadata_json("a.bin", 100)).unwrap();
        assert!(receiver.handle_text(r#"{"type":"chat","body":"hi"}"#).unwrap().is_empty());
        assert!(receiver.handle_text(r#"{"type":"progress","percent":5}"#).unwrap().is_empty());
        assert_eq!(receiver.state(), ReceiveState::Receiving);
    }

    #[test]
    fn test_progress_percent_floors_and_caps() {
        assert_eq!(progress_percent(0, 3), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 66);
        assert_eq!(progress_percent(5, 3), 100);
        assert_eq!(progress_percent(0, 0), 100);
        assert_eq!(progress_percent(u64::MAX, u64::MAX), 100);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_file_name(".."), "download");
        assert_eq!(sanitize_file_name("  "), "download");
    }

    #[tokio::test]
    async fn test_save_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let file = ReceivedFile {
            metadata: FileMetadata {
                name: "../notes.txt".to_string(),
                size: 5,
                mime_type: "text/plain".to_string(),
            },
            data: Bytes::from_static(b"hello"),
        };

        let first = file.save_to(dir.path()).await.unwrap();
        let second = file.save_to(dir.path()).await.unwrap();
        assert_eq!(first, dir.path().join("notes.txt"));
        assert_eq!(second, dir.path().join("notes (1).txt"));
        assert_eq!(std::fs::read(&second).unwrap(), b"hello");
    }
}
