//! WebSocket signaling client
//!
//! Keeps one duplex connection to the relay. Outbound messages go through a
//! writer task fed by an unbounded channel; inbound frames are decoded and
//! surfaced as [`TransportEvent`]s in delivery order.

use super::SignalingError;
use crate::config::SignalingConfig;
use crate::webrtc::signaling::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_tungstenite::tungstenite::protocol::Message;

/// What the relay connection produced
#[derive(Debug)]
pub enum TransportEvent {
    /// A decoded relay message
    Message(ServerMessage),
    /// Text that is not a known relay message; already logged
    Malformed(String),
    /// The connection ended, with a reason when one is known
    Closed(Option<String>),
}

/// Cloneable handle for sending to the relay
#[derive(Debug, Clone)]
pub struct SignalingSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl SignalingSender {
    pub(crate) fn pair() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: &ClientMessage) -> Result<(), SignalingError> {
        let json = message.to_json()?;
        debug!("-> relay: {}", json);
        self.tx
            .send(Message::Text(json.into()))
            .map_err(|_| SignalingError::Closed)
    }
}

/// A live connection to the relay
pub struct SignalingTransport {
    sender: SignalingSender,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl SignalingTransport {
    /// Connect to the relay WebSocket
    pub async fn connect(config: &SignalingConfig) -> Result<Self, SignalingError> {
        let timeout = Duration::from_secs(config.connect_timeout_secs.max(1));
        let (ws_stream, _) = time::timeout(timeout, tokio_tungstenite::connect_async(config.url.as_str()))
            .await
            .map_err(|_| SignalingError::Timeout(format!("connecting to {}", config.url)))?
            .map_err(|e| SignalingError::ConnectFailed(format!("{}: {}", config.url, e)))?;

        info!("Connected to relay at {}", config.url);

        let (write, mut read) = ws_stream.split();
        let (sender, mut outbound_rx) = SignalingSender::pair();
        let (event_tx, events) = mpsc::unbounded_channel();
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(async move {
            let mut write = write;
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    warn!("Relay write failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        }));

        let pong_tx = sender.tx.clone();
        tasks.push(tokio::spawn(async move {
            let mut reason = None;
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let text: &str = text.as_ref();
                        debug!("<- relay: {}", text);
                        let event = match ServerMessage::from_json(text) {
                            Ok(message) => TransportEvent::Message(message),
                            Err(e) => {
                                warn!("{}", e);
                                TransportEvent::Malformed(text.to_string())
                            }
                        };
                        if event_tx.send(event).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        debug!("Ignoring {} byte binary frame from relay", data.len());
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = pong_tx.send(Message::Pong(data));
                    }
                    Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                    Ok(Message::Close(frame)) => {
                        reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                        info!("Relay closed the connection");
                        break;
                    }
                    Err(e) => {
                        error!("Relay WebSocket error: {}", e);
                        reason = Some(e.to_string());
                        break;
                    }
                }
            }
            let _ = event_tx.send(TransportEvent::Closed(reason));
        }));

        if config.keepalive_secs > 0 {
            let keepalive = sender.clone();
            let period = Duration::from_secs(config.keepalive_secs);
            tasks.push(tokio::spawn(async move {
                let mut interval = time::interval(period);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if keepalive.send(&ClientMessage::Ping).is_err() {
                        break;
                    }
                }
            }));
        }

        Ok(Self { sender, events, tasks })
    }

    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    /// Next inbound event; `None` once the connection tasks are gone
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

impl Drop for SignalingTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
