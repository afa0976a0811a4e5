//! Send path: metadata, backpressure-aware chunk pump and progress acks.

use super::{ChannelMessage, FileMetadata, TransferError, TransferSettings};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Outbound side of a data channel as seen by the chunk pump
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), TransferError>;

    async fn send_chunk(&self, chunk: Bytes) -> Result<(), TransferError>;

    /// Bytes queued on the channel but not yet handed to the transport
    async fn buffered_amount(&self) -> usize;

    /// Resolve after the buffered amount drops to the low-water mark.
    /// Fails with `ChannelClosed` if the channel goes away instead.
    async fn wait_low_water(&self) -> Result<(), TransferError>;

    fn is_open(&self) -> bool;
}

/// A local file about to be offered to the peer
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub path: PathBuf,
    pub metadata: FileMetadata,
}

impl OutgoingFile {
    pub async fn inspect(path: &Path) -> Result<Self, TransferError> {
        let stat = tokio::fs::metadata(path).await?;
        if !stat.is_file() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{:?} is not a regular file", path),
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            metadata: FileMetadata {
                name,
                size: stat.len(),
                mime_type,
            },
        })
    }

    pub async fn open(&self) -> Result<tokio::fs::File, TransferError> {
        Ok(tokio::fs::File::open(&self.path).await?)
    }
}

pub struct FileSender {
    settings: TransferSettings,
}

impl FileSender {
    pub fn new(settings: TransferSettings) -> Self {
        Self { settings }
    }

    /// Send metadata followed by `metadata.size` bytes from `reader`, in
    /// chunk-size slices. Returns the number of payload bytes sent.
    pub async fn send<S, R>(&self, sink: &S, metadata: &FileMetadata, mut reader: R) -> Result<u64, TransferError>
    where
        S: ChunkSink + ?Sized,
        R: AsyncRead + Unpin,
    {
        if !sink.is_open() {
            return Err(TransferError::ChannelClosed);
        }
        sink.send_text(metadata.to_message().to_json()?).await?;
        info!("Sent metadata for {} ({} bytes)", metadata.name, metadata.size);

        let chunk_size = self.settings.chunk_size.max(1);
        let mut buffer = vec![0u8; chunk_size];
        let mut remaining = metadata.size;
        let mut sent: u64 = 0;

        while remaining > 0 {
            if !sink.is_open() {
                warn!("Data channel closed after {} of {} bytes", sent, metadata.size);
                return Err(TransferError::ChannelClosed);
            }
            self.wait_for_capacity(sink).await?;

            let len = remaining.min(chunk_size as u64) as usize;
            reader.read_exact(&mut buffer[..len]).await?;
            sink.send_chunk(Bytes::copy_from_slice(&buffer[..len])).await?;

            sent += len as u64;
            remaining -= len as u64;
        }

        debug!("Chunk pump finished, {} bytes sent", sent);
        Ok(sent)
    }

    async fn wait_for_capacity<S: ChunkSink + ?Sized>(&self, sink: &S) -> Result<(), TransferError> {
        let mut buffered = sink.buffered_amount().await;
        if buffered <= self.settings.high_water_mark {
            return Ok(());
        }

        debug!(
            "Backpressure: {} bytes buffered (high {}), pausing",
            buffered, self.settings.high_water_mark
        );
        while buffered > self.settings.high_water_mark {
            sink.wait_low_water().await?;
            buffered = sink.buffered_amount().await;
        }
        debug!("Backpressure released at {} bytes buffered", buffered);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckUpdate {
    Progress(u8),
    Complete,
}

/// Tracks progress acknowledgments coming back from the receiver
#[derive(Debug, Default)]
pub struct AckTracker {
    last_percent: u8,
    complete: bool,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    pub fn reset(&mut self) {
        self.last_percent = 0;
        self.complete = false;
    }

    /// Nothing to acknowledge for an empty file.
    pub fn mark_complete(&mut self) -> Vec<AckUpdate> {
        if self.complete {
            return Vec::new();
        }
        self.complete = true;
        self.last_percent = 100;
        vec![AckUpdate::Complete]
    }

    /// Interpret a text frame from the receiver
    pub fn handle_text(&mut self, text: &str) -> Vec<AckUpdate> {
        let percent = match serde_json::from_str::<ChannelMessage>(text) {
            Ok(ChannelMessage::Progress { percent }) => percent.min(100),
            Ok(ChannelMessage::Metadata { .. }) => {
                debug!("Ignoring metadata message on send side");
                return Vec::new();
            }
            Err(e) => {
                warn!("Dropping unparseable data channel text: {}", e);
                return Vec::new();
            }
        };

        if self.complete || percent <= self.last_percent {
            debug!("Ignoring stale progress ack {}%", percent);
            return Vec::new();
        }

        self.last_percent = percent;
        let mut updates = vec![AckUpdate::Progress(percent)];
        if percent == 100 {
            self.complete = true;
            updates.push(AckUpdate::Complete);
        }
        updates
    }
}
