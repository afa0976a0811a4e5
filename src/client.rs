//! Send and receive entry points
//!
//! Each entry point connects to the relay, opens or joins a room and then
//! drives one [`SessionContext`] from two event sources: relay messages,
//! routed through the role's [`MessageRouter`], and peer connection events.

use crate::config::Config;
use crate::transfer::{OutgoingFile, TransferError};
use crate::transport::{IceServerSource, RelayApi, SignalingError, SignalingTransport, TransportEvent};
use crate::webrtc::session::Flow;
use crate::webrtc::{
    AnswererRouter, ClientMessage, MessageRouter, OffererRouter, PeerError, PeerEvent, Role, SessionContext,
    SessionEvent,
};
use log::{info, warn};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Session-level failures
#[derive(Debug)]
pub enum ClientError {
    Signaling(SignalingError),
    /// The relay rejected the room request
    Server { code: Option<String>, message: String },
    Peer(PeerError),
    /// The sender left before the file arrived
    PeerLeft,
    Transfer(TransferError),
    /// The room check says joining cannot work
    RoomUnavailable(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Signaling(e) => write!(f, "{}", e),
            ClientError::Server { code: Some(code), message } => {
                write!(f, "Relay error {}: {}", code, message)
            }
            ClientError::Server { code: None, message } => write!(f, "Relay error: {}", message),
            ClientError::Peer(e) => write!(f, "{}", e),
            ClientError::PeerLeft => write!(f, "Peer left before the transfer completed"),
            ClientError::Transfer(e) => write!(f, "Transfer failed: {}", e),
            ClientError::RoomUnavailable(msg) => write!(f, "Room unavailable: {}", msg),
        }
    }
}

impl Error for ClientError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClientError::Signaling(e) => Some(e),
            ClientError::Peer(e) => Some(e),
            ClientError::Transfer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SignalingError> for ClientError {
    fn from(e: SignalingError) -> Self {
        ClientError::Signaling(e)
    }
}

impl From<PeerError> for ClientError {
    fn from(e: PeerError) -> Self {
        ClientError::Peer(e)
    }
}

impl From<TransferError> for ClientError {
    fn from(e: TransferError) -> Self {
        ClientError::Transfer(e)
    }
}

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub file: PathBuf,
    pub password: Option<String>,
    /// Keep the room open for further receivers after a transfer
    pub stay_open: bool,
}

#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    pub room_id: String,
    pub password: Option<String>,
    pub skip_room_check: bool,
    pub stay_open: bool,
}

/// Create a room and send `options.file` to whoever joins it
pub async fn run_send(
    config: Config,
    options: SendOptions,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Result<(), ClientError> {
    let outgoing = OutgoingFile::inspect(&options.file).await?;
    info!(
        "Offering {} ({} bytes, {})",
        outgoing.metadata.name, outgoing.metadata.size, outgoing.metadata.mime_type
    );

    let api = RelayApi::new(&config.signaling)?;
    let ice = IceServerSource::prefetch(&api, &config.webrtc);
    let mut transport = SignalingTransport::connect(&config.signaling).await?;

    let (ctx, peer_rx) = SessionContext::new(Role::Offerer, config, transport.sender(), ice, events);
    let mut ctx = ctx
        .with_room(None, options.password.clone())
        .with_outgoing(outgoing);

    ctx.send(&ClientMessage::CreateRoom {
        password: options.password,
    })?;

    drive(&mut ctx, &mut transport, peer_rx, &OffererRouter, options.stay_open).await
}

/// Join `options.room_id` and save the file the sender offers
pub async fn run_receive(
    config: Config,
    options: ReceiveOptions,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Result<(), ClientError> {
    let api = RelayApi::new(&config.signaling)?;

    if !options.skip_room_check {
        match api.check_room(&options.room_id).await {
            Ok(status) => {
                let _ = events.send(SessionEvent::RoomStatus {
                    exists: status.exists,
                    has_password: status.has_password,
                });
                if !status.exists {
                    return Err(ClientError::RoomUnavailable(format!(
                        "room {} does not exist",
                        options.room_id
                    )));
                }
                if status.has_password && options.password.is_none() {
                    return Err(ClientError::RoomUnavailable(format!(
                        "room {} requires a password",
                        options.room_id
                    )));
                }
            }
            Err(e) => warn!("Room check failed ({}); joining anyway", e),
        }
    }

    let ice = IceServerSource::prefetch(&api, &config.webrtc);
    let mut transport = SignalingTransport::connect(&config.signaling).await?;

    let (ctx, peer_rx) = SessionContext::new(Role::Answerer, config, transport.sender(), ice, events);
    let mut ctx = ctx.with_room(Some(options.room_id.clone()), options.password.clone());

    ctx.send(&ClientMessage::JoinRoom {
        room_id: options.room_id,
        password: options.password,
    })?;

    drive(&mut ctx, &mut transport, peer_rx, &AnswererRouter, options.stay_open).await
}

async fn drive(
    ctx: &mut SessionContext,
    transport: &mut SignalingTransport,
    mut peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    router: &dyn MessageRouter,
    stay_open: bool,
) -> Result<(), ClientError> {
    let result = loop {
        tokio::select! {
            event = transport.recv() => match event {
                Some(TransportEvent::Message(message)) => {
                    if let Err(e) = router.route(message, ctx).await {
                        break Err(e);
                    }
                }
                Some(TransportEvent::Malformed(_)) => {}
                Some(TransportEvent::Closed(reason)) => {
                    warn!("Relay connection closed: {}", reason.as_deref().unwrap_or("no reason given"));
                    ctx.on_transport_closed().await;
                    break Err(ClientError::Signaling(SignalingError::Closed));
                }
                None => {
                    ctx.on_transport_closed().await;
                    break Err(ClientError::Signaling(SignalingError::Closed));
                }
            },
            Some(event) = peer_rx.recv() => {
                match ctx.handle_peer_event(event).await {
                    Ok(Flow::TransferDone) if !stay_open => break Ok(()),
                    Ok(_) => {}
                    Err(e) => break Err(e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; closing session {}", ctx.id);
                break Ok(());
            }
        }
    };

    ctx.teardown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IceServerConfig, SignalingConfig};
    use futures::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::Message;

    fn config_for(url: String) -> Config {
        let mut config = Config::default();
        config.signaling = SignalingConfig {
            url,
            keepalive_secs: 0,
            ..Default::default()
        };
        config.webrtc.ice_servers = vec![IceServerConfig {
            urls: vec!["stun:stun.example.org:3478".to_string()],
            username: None,
            credential: None,
        }];
        config
    }

    fn collect(mut rx: mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_send_reports_room_then_relay_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let relay = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text(r#"{"type":"RoomCreated","room_id":"abcd12"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
            first
        });

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, b"hello").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let options = SendOptions {
            file,
            password: Some("secret".to_string()),
            stay_open: false,
        };
        let result = run_send(config_for(url), options, tx).await;
        assert!(matches!(result, Err(ClientError::Signaling(SignalingError::Closed))));

        let first = relay.await.unwrap();
        let Message::Text(first) = first else {
            panic!("Expected text frame");
        };
        let first: &str = first.as_ref();
        assert_eq!(first, r#"{"type":"CreateRoom","password":"secret"}"#);

        let events = collect(rx);
        assert!(events.contains(&SessionEvent::RoomCreated {
            room_id: "abcd12".to_string(),
            share_url: None
        }));
    }

    #[tokio::test]
    async fn test_send_missing_file() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let options = SendOptions {
            file: PathBuf::from("/nonexistent/file.bin"),
            password: None,
            stay_open: false,
        };
        let result = run_send(Config::default(), options, tx).await;
        assert!(matches!(result, Err(ClientError::Transfer(TransferError::Io(_)))));
    }

    #[tokio::test]
    async fn test_receive_stops_on_missing_room() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf).await;
            let body = r#"{"error":"Room not found"}"#;
            let response = format!(
                "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let options = ReceiveOptions {
            room_id: "zzzz99".to_string(),
            password: None,
            skip_room_check: false,
            stay_open: false,
        };
        let err = run_receive(config_for(url), options, tx).await.unwrap_err();
        assert!(matches!(err, ClientError::RoomUnavailable(_)));
        assert!(err.to_string().contains("zzzz99"));
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::Server {
            code: Some("INVALID_PASSWORD".to_string()),
            message: "Wrong password".to_string(),
        };
        assert_eq!(err.to_string(), "Relay error INVALID_PASSWORD: Wrong password");
        assert_eq!(
            ClientError::PeerLeft.to_string(),
            "Peer left before the transfer completed"
        );
    }
}
