//! Data channel wiring
//!
//! Channels are detached once open and read with a buffer sized to the
//! negotiated maximum message size, so full-size chunks arrive intact. Every
//! frame and the final close are forwarded into the session as
//! [`PeerEvent`]s tagged with the peer generation they belong to. The sending
//! side exposes the channel to the chunk pump with a low-water-mark signal
//! for backpressure.

use super::session::PeerEvent;
use crate::transfer::{ChannelPayload, ChunkSink, TransferError};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};
use webrtc::data::data_channel::DataChannel;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

#[derive(Default)]
struct ChannelSignals {
    low_water: Notify,
    closed: Notify,
    closed_flag: AtomicBool,
}

impl ChannelSignals {
    /// Returns true for the first caller only.
    fn mark_closed(&self) -> bool {
        let first = !self.closed_flag.swap(true, Ordering::SeqCst);
        self.closed.notify_waiters();
        first
    }

    fn is_closed(&self) -> bool {
        self.closed_flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct DataChannelLink {
    channel: Arc<RTCDataChannel>,
    signals: Arc<ChannelSignals>,
}

impl std::fmt::Debug for DataChannelLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataChannelLink")
            .field("label", &self.channel.label())
            .field("state", &self.channel.ready_state())
            .finish()
    }
}

impl DataChannelLink {
    pub fn new(channel: Arc<RTCDataChannel>) -> Self {
        Self {
            channel,
            signals: Arc::new(ChannelSignals::default()),
        }
    }

    pub fn label(&self) -> &str {
        self.channel.label()
    }

    /// Register channel handlers. Events are tagged with `generation`;
    /// `max_message_size` bounds the largest frame the channel can deliver.
    pub async fn attach(
        &self,
        generation: u64,
        low_water_mark: usize,
        max_message_size: usize,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) {
        self.channel.set_buffered_amount_low_threshold(low_water_mark).await;
        let signals = self.signals.clone();
        self.channel
            .on_buffered_amount_low(Box::new(move || {
                signals.low_water.notify_one();
                Box::pin(async {})
            }))
            .await;

        let channel: Weak<RTCDataChannel> = Arc::downgrade(&self.channel);
        let signals = self.signals.clone();
        self.channel.on_open(Box::new(move || {
            Box::pin(async move {
                let Some(channel) = channel.upgrade() else {
                    return;
                };
                let label = channel.label().to_string();
                match channel.detach().await {
                    Ok(raw) => {
                        info!("Data channel '{}' open", label);
                        let _ = events.send(PeerEvent::ChannelOpen { generation });
                        tokio::spawn(read_frames(raw, label, generation, max_message_size, signals, events));
                    }
                    Err(e) => {
                        warn!("Data channel '{}' could not be detached: {}", label, e);
                        if signals.mark_closed() {
                            let _ = events.send(PeerEvent::ChannelClosed { generation });
                        }
                    }
                }
            })
        }));
    }

    /// Close the channel locally. No close event is emitted for it.
    pub async fn close(&self) {
        self.signals.mark_closed();
        if let Err(e) = self.channel.close().await {
            debug!("Data channel close: {}", e);
        }
    }
}

/// Forward frames until the stream ends, then report the close once.
async fn read_frames(
    raw: Arc<DataChannel>,
    label: String,
    generation: u64,
    max_message_size: usize,
    signals: Arc<ChannelSignals>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let mut buf = vec![0u8; max_message_size];
    loop {
        match raw.read_data_channel(&mut buf).await {
            // Empty binary frames are never sent, so this is end of stream.
            Ok((0, false)) => break,
            Ok((n, is_string)) => {
                let payload = if is_string {
                    ChannelPayload::Text(String::from_utf8_lossy(&buf[..n]).into_owned())
                } else {
                    ChannelPayload::Binary(Bytes::copy_from_slice(&buf[..n]))
                };
                if events.send(PeerEvent::ChannelMessage { generation, payload }).is_err() {
                    debug!("Session gone; stopping reads on '{}'", label);
                    break;
                }
            }
            Err(e) => {
                if !signals.is_closed() {
                    warn!("Data channel '{}' read failed: {}", label, e);
                }
                break;
            }
        }
    }

    if signals.mark_closed() {
        info!("Data channel '{}' closed", label);
        let _ = events.send(PeerEvent::ChannelClosed { generation });
    }
}

#[async_trait]
impl ChunkSink for DataChannelLink {
    async fn send_text(&self, text: String) -> Result<(), TransferError> {
        if !self.is_open() {
            return Err(TransferError::ChannelClosed);
        }
        self.channel
            .send_text(text)
            .await
            .map_err(|e| TransferError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn send_chunk(&self, chunk: Bytes) -> Result<(), TransferError> {
        if !self.is_open() {
            return Err(TransferError::ChannelClosed);
        }
        self.channel
            .send(&chunk)
            .await
            .map_err(|e| TransferError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.channel.buffered_amount().await
    }

    async fn wait_low_water(&self) -> Result<(), TransferError> {
        let closed = self.signals.closed.notified();
        if !self.is_open() {
            return Err(TransferError::ChannelClosed);
        }
        tokio::select! {
            _ = self.signals.low_water.notified() => Ok(()),
            _ = closed => Err(TransferError::ChannelClosed),
        }
    }

    fn is_open(&self) -> bool {
        !self.signals.is_closed() && self.channel.ready_state() == RTCDataChannelState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebRTCConfig;
    use crate::webrtc::PeerConnectionManager;

    #[tokio::test]
    async fn test_unopened_channel_refuses_sends() {
        let pc = PeerConnectionManager::new(WebRTCConfig::default())
            .create_peer_connection(&[])
            .await
            .unwrap();
        let channel = PeerConnectionManager::create_data_channel(&pc, "fileTransfer").await.unwrap();
        let link = DataChannelLink::new(channel);
        let (tx, mut rx) = mpsc::unbounded_channel();
        link.attach(1, 1024, 1024 * 1024, tx).await;

        assert_eq!(link.label(), "fileTransfer");
        assert!(!link.is_open());
        assert!(matches!(link.send_chunk(Bytes::from_static(b"x")).await, Err(TransferError::ChannelClosed)));
        assert!(matches!(link.wait_low_water().await, Err(TransferError::ChannelClosed)));

        link.close().await;
        assert!(rx.try_recv().is_err());
        PeerConnectionManager::close(&pc).await.unwrap();
    }

    #[test]
    fn test_close_is_reported_once() {
        let signals = ChannelSignals::default();
        assert!(!signals.is_closed());
        assert!(signals.mark_closed());
        assert!(!signals.mark_closed());
        assert!(signals.is_closed());
    }
}
