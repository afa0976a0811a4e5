//! Transfer session state
//!
//! `SessionContext` is the single mutable bundle the routers and peer event
//! handlers work on: the relay sender, the current peer connection and data
//! channel, the candidate queue and the transfer counters. It is owned by
//! the client controller and only ever borrowed by handlers.
//!
//! Every peer connection gets a generation number. Callbacks registered on
//! a connection tag their events with it, so events from a connection that
//! has since been torn down are recognised and dropped.

use super::candidate_queue::CandidateQueue;
use super::data_channel::DataChannelLink;
use super::peer_connection::PeerConnectionManager;
use super::signaling::ClientMessage;
use crate::client::ClientError;
use crate::config::Config;
use crate::transfer::{
    AckTracker, AckUpdate, ChannelMessage, ChannelPayload, ChunkSink, FileMetadata, FileReceiver,
    FileSender, OutgoingFile, ReceiverEvent, TransferError, TransferSettings,
};
use crate::transport::{IceServerSource, SignalingError, SignalingSender};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

/// Which side of the transfer this session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the room and sends the file
    Offerer,
    /// Joins the room and receives the file
    Answerer,
}

/// Peer connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

/// Events raised by peer connection and data channel callbacks
#[derive(Debug)]
pub enum PeerEvent {
    /// The remote peer opened a data channel (answerer side)
    RemoteChannel { generation: u64, link: DataChannelLink },
    ChannelOpen { generation: u64 },
    ChannelMessage { generation: u64, payload: ChannelPayload },
    ChannelClosed { generation: u64 },
    ConnectionState { generation: u64, state: RTCPeerConnectionState },
    /// The chunk pump finished
    SendFinished { generation: u64, result: Result<u64, TransferError> },
}

impl PeerEvent {
    pub fn generation(&self) -> u64 {
        match self {
            PeerEvent::RemoteChannel { generation, .. }
            | PeerEvent::ChannelOpen { generation }
            | PeerEvent::ChannelMessage { generation, .. }
            | PeerEvent::ChannelClosed { generation }
            | PeerEvent::ConnectionState { generation, .. }
            | PeerEvent::SendFinished { generation, .. } => *generation,
        }
    }
}

/// Everything the caller gets to see about a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RoomCreated { room_id: String, share_url: Option<String> },
    RoomJoined { room_id: String },
    RoomStatus { exists: bool, has_password: bool },
    PeerJoined { peer_count: usize },
    PeerLeft { peer_count: usize },
    StateChanged(PeerState),
    IncomingFile(FileMetadata),
    /// Receiver: percent reported; sender: percent acknowledged
    Progress { percent: u8 },
    /// The sender pushed every chunk into the channel
    SendFinished { bytes: u64 },
    TransferComplete,
    FileReceived { metadata: FileMetadata, path: PathBuf },
    ServerError { code: Option<String>, message: String },
    Error(String),
}

/// What the controller should do after handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// A transfer reached completion
    TransferDone,
}

struct ActivePeer {
    generation: u64,
    connection: Option<Arc<RTCPeerConnection>>,
    channel: Option<DataChannelLink>,
    send_task: Option<JoinHandle<()>>,
}

pub struct SessionContext {
    /// Unique session ID, used in logs
    pub id: String,
    role: Role,
    config: Config,
    room_id: Option<String>,
    password: Option<String>,
    room_established: bool,
    outgoing: Option<OutgoingFile>,
    state: PeerState,
    generation: u64,
    peer: Option<ActivePeer>,
    pub candidates: CandidateQueue,
    pub receiver: FileReceiver,
    pub acks: AckTracker,
    pub peers: PeerConnectionManager,
    pub ice: IceServerSource,
    signaling: SignalingSender,
    events: mpsc::UnboundedSender<SessionEvent>,
    peer_events: mpsc::UnboundedSender<PeerEvent>,
}

impl SessionContext {
    /// Create a session; the returned receiver yields the peer events the
    /// controller must feed back into [`handle_peer_event`](Self::handle_peer_event).
    pub fn new(
        role: Role,
        config: Config,
        signaling: SignalingSender,
        ice: IceServerSource,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (peer_events, peer_rx) = mpsc::unbounded_channel();
        let id = uuid::Uuid::new_v4().to_string();
        info!("Session {} created as {:?}", id, role);
        let ctx = Self {
            id,
            role,
            peers: PeerConnectionManager::new(config.webrtc.clone()),
            config,
            room_id: None,
            password: None,
            room_established: false,
            outgoing: None,
            state: PeerState::Idle,
            generation: 0,
            peer: None,
            candidates: CandidateQueue::new(),
            receiver: FileReceiver::new(),
            acks: AckTracker::new(),
            ice,
            signaling,
            events,
            peer_events,
        };
        (ctx, peer_rx)
    }

    pub fn with_room(mut self, room_id: Option<String>, password: Option<String>) -> Self {
        self.room_id = room_id;
        self.password = password;
        self
    }

    pub fn with_outgoing(mut self, file: OutgoingFile) -> Self {
        self.outgoing = Some(file);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn set_room_id(&mut self, room_id: String) {
        self.room_id = Some(room_id);
    }

    /// The relay accepted our CreateRoom/JoinRoom
    pub fn mark_room_established(&mut self) {
        self.room_established = true;
    }

    pub fn room_established(&self) -> bool {
        self.room_established
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `generation` still names the live peer connection
    pub fn is_current(&self, generation: u64) -> bool {
        self.peer.as_ref().map(|p| p.generation) == Some(generation)
    }

    pub fn connection(&self) -> Option<Arc<RTCPeerConnection>> {
        self.peer.as_ref().and_then(|p| p.connection.clone())
    }

    pub fn channel(&self) -> Option<DataChannelLink> {
        self.peer.as_ref().and_then(|p| p.channel.clone())
    }

    pub fn signaling(&self) -> SignalingSender {
        self.signaling.clone()
    }

    pub fn peer_events(&self) -> mpsc::UnboundedSender<PeerEvent> {
        self.peer_events.clone()
    }

    pub fn send(&self, message: &ClientMessage) -> Result<(), SignalingError> {
        self.signaling.send(message)
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_state(&mut self, state: PeerState) {
        if self.state != state {
            debug!("Session {} peer state: {:?} -> {:?}", self.id, self.state, state);
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    /// Start a fresh negotiation, closing any previous peer connection
    /// first. Returns the generation the new connection's callbacks must use.
    pub async fn begin_negotiation(&mut self) -> u64 {
        if self.teardown().await {
            info!("Session {} replaced its previous peer connection", self.id);
        }
        self.set_state(PeerState::Idle);

        self.generation += 1;
        self.candidates.rearm();
        self.peer = Some(ActivePeer {
            generation: self.generation,
            connection: None,
            channel: None,
            send_task: None,
        });
        self.set_state(PeerState::Negotiating);
        self.generation
    }

    /// Returns false, leaving the caller to close `connection`, when
    /// `generation` is no longer current.
    pub fn attach_connection(&mut self, generation: u64, connection: Arc<RTCPeerConnection>) -> bool {
        match self.peer.as_mut() {
            Some(peer) if peer.generation == generation => {
                peer.connection = Some(connection);
                true
            }
            _ => false,
        }
    }

    pub fn attach_channel(&mut self, generation: u64, link: DataChannelLink) -> bool {
        match self.peer.as_mut() {
            Some(peer) if peer.generation == generation => {
                peer.channel = Some(link);
                true
            }
            _ => false,
        }
    }

    /// Close the current peer connection and data channel, if any.
    /// Returns whether anything was closed; a second call is a no-op.
    pub async fn teardown(&mut self) -> bool {
        let Some(peer) = self.peer.take() else {
            return false;
        };
        // Candidates arriving from here on wait for the next remote description.
        self.candidates.rearm();

        if let Some(task) = peer.send_task {
            task.abort();
        }
        if let Some(channel) = peer.channel {
            channel.close().await;
        }
        if let Some(connection) = peer.connection {
            if let Err(e) = PeerConnectionManager::close(&connection).await {
                warn!("Session {}: {}", self.id, e);
            }
        }
        info!("Session {} closed peer connection #{}", self.id, peer.generation);
        self.set_state(PeerState::Closed);
        true
    }

    /// Forget everything tied to the current attempt: peer connection,
    /// queued candidates and transfer counters.
    pub async fn reset_attempt(&mut self) {
        self.teardown().await;
        self.candidates.reset();
        self.receiver.reset();
        self.acks.reset();
        self.ice.refresh();
        self.set_state(PeerState::Idle);
    }

    /// Surface an error and close the peer connection.
    pub async fn fail(&mut self, error: impl std::fmt::Display) {
        warn!("Session {}: {}", self.id, error);
        self.emit(SessionEvent::Error(error.to_string()));
        self.teardown().await;
    }

    /// The relay connection is gone
    pub async fn on_transport_closed(&mut self) {
        self.teardown().await;
        self.set_state(PeerState::Idle);
    }

    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<Flow, ClientError> {
        if !self.is_current(event.generation()) {
            debug!(
                "Session {} dropping event from stale peer connection #{}",
                self.id,
                event.generation()
            );
            return Ok(Flow::Continue);
        }

        match event {
            PeerEvent::RemoteChannel { generation, link } => {
                if self.role == Role::Offerer {
                    warn!("Ignoring data channel '{}' opened by the answerer", link.label());
                    link.close().await;
                } else {
                    info!("Remote data channel '{}' announced", link.label());
                    self.attach_channel(generation, link);
                }
                Ok(Flow::Continue)
            }
            PeerEvent::ChannelOpen { .. } => {
                self.set_state(PeerState::Connected);
                if self.role == Role::Offerer {
                    self.start_sending();
                }
                Ok(Flow::Continue)
            }
            PeerEvent::ChannelMessage { payload, .. } => match self.role {
                Role::Offerer => Ok(self.on_ack(payload)),
                Role::Answerer => self.on_incoming(payload).await,
            },
            PeerEvent::ChannelClosed { .. } => {
                if !self.transfer_complete() {
                    self.emit(SessionEvent::Error(
                        "Data channel closed before the transfer completed".to_string(),
                    ));
                }
                self.teardown().await;
                Ok(Flow::Continue)
            }
            PeerEvent::ConnectionState { state, .. } => {
                match state {
                    RTCPeerConnectionState::Failed => {
                        self.fail("Peer connection failed").await;
                    }
                    RTCPeerConnectionState::Disconnected => {
                        warn!("Session {} peer connection disconnected", self.id);
                    }
                    other => debug!("Session {} peer connection state {}", self.id, other),
                }
                Ok(Flow::Continue)
            }
            PeerEvent::SendFinished { result, .. } => self.on_send_finished(result).await,
        }
    }

    fn transfer_complete(&self) -> bool {
        match self.role {
            Role::Offerer => self.acks.is_complete(),
            Role::Answerer => self.receiver.state() == crate::transfer::ReceiveState::Complete,
        }
    }

    fn start_sending(&mut self) {
        let Some(file) = self.outgoing.clone() else {
            warn!("Session {} has no file to send", self.id);
            return;
        };
        let Some(peer) = self.peer.as_mut() else {
            return;
        };
        let Some(link) = peer.channel.clone() else {
            warn!("Session {} opened without a data channel", self.id);
            return;
        };

        if let Some(task) = peer.send_task.take() {
            task.abort();
        }
        self.acks.reset();

        let generation = peer.generation;
        let events = self.peer_events.clone();
        let sender = FileSender::new(TransferSettings::from(&self.config.transfer));
        info!("Session {} sending {} ({} bytes)", self.id, file.metadata.name, file.metadata.size);

        peer.send_task = Some(tokio::spawn(async move {
            let result = match file.open().await {
                Ok(reader) => sender.send(&link, &file.metadata, reader).await,
                Err(e) => Err(e),
            };
            let _ = events.send(PeerEvent::SendFinished { generation, result });
        }));
    }

    async fn on_send_finished(&mut self, result: Result<u64, TransferError>) -> Result<Flow, ClientError> {
        if let Some(peer) = self.peer.as_mut() {
            peer.send_task = None;
        }

        match result {
            Ok(bytes) => {
                info!("Session {} pushed {} bytes into the data channel", self.id, bytes);
                self.emit(SessionEvent::SendFinished { bytes });
                let empty = self.outgoing.as_ref().map(|f| f.metadata.size == 0).unwrap_or(false);
                if empty && self.acks.mark_complete().contains(&AckUpdate::Complete) {
                    self.emit(SessionEvent::TransferComplete);
                    return Ok(Flow::TransferDone);
                }
                Ok(Flow::Continue)
            }
            Err(TransferError::ChannelClosed) => {
                // The ChannelClosed event reports and tears down.
                warn!("Session {} chunk pump stopped: data channel closed", self.id);
                Ok(Flow::Continue)
            }
            Err(e) => {
                self.fail(&e).await;
                Err(ClientError::Transfer(e))
            }
        }
    }

    fn on_ack(&mut self, payload: ChannelPayload) -> Flow {
        let text = match payload {
            ChannelPayload::Text(text) => text,
            ChannelPayload::Binary(data) => {
                warn!("Sender ignoring {} byte binary frame", data.len());
                return Flow::Continue;
            }
        };

        let mut flow = Flow::Continue;
        for update in self.acks.handle_text(&text) {
            match update {
                AckUpdate::Progress(percent) => self.emit(SessionEvent::Progress { percent }),
                AckUpdate::Complete => {
                    info!("Session {} transfer acknowledged complete", self.id);
                    self.emit(SessionEvent::TransferComplete);
                    flow = Flow::TransferDone;
                }
            }
        }
        flow
    }

    async fn on_incoming(&mut self, payload: ChannelPayload) -> Result<Flow, ClientError> {
        let events = match self.receiver.handle_payload(payload) {
            Ok(events) => events,
            Err(e) => {
                self.fail(&e).await;
                return Err(ClientError::Transfer(e));
            }
        };

        let mut flow = Flow::Continue;
        for event in events {
            match event {
                ReceiverEvent::IncomingFile(metadata) => self.emit(SessionEvent::IncomingFile(metadata)),
                ReceiverEvent::Progress(percent) => {
                    self.send_progress(percent).await;
                    self.emit(SessionEvent::Progress { percent });
                }
                ReceiverEvent::Complete(file) => {
                    let path = match file.save_to(&self.config.transfer.output_dir).await {
                        Ok(path) => path,
                        Err(e) => {
                            self.fail(&e).await;
                            return Err(ClientError::Transfer(e));
                        }
                    };
                    self.emit(SessionEvent::FileReceived {
                        metadata: file.metadata,
                        path,
                    });
                    self.emit(SessionEvent::TransferComplete);
                    flow = Flow::TransferDone;
                }
            }
        }
        Ok(flow)
    }

    async fn send_progress(&self, percent: u8) {
        let Some(link) = self.channel() else {
            return;
        };
        let ack = match ChannelMessage::progress(percent).to_json() {
            Ok(ack) => ack,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        if let Err(e) = link.send_text(ack).await {
            warn!("Session {} could not send progress ack: {}", self.id, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::IceServerSource;
    use crate::webrtc::{AnswererRouter, MessageRouter, OffererRouter, ServerMessage};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::protocol::Message;

    pub(crate) struct Harness {
        pub ctx: SessionContext,
        pub peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
        pub events: mpsc::UnboundedReceiver<SessionEvent>,
        pub relay: mpsc::UnboundedReceiver<Message>,
    }

    impl Harness {
        pub(crate) fn new(role: Role) -> Self {
            Self::with_config(role, Config::default())
        }

        pub(crate) fn with_config(role: Role, config: Config) -> Self {
            let (signaling, relay) = SignalingSender::pair();
            let (events_tx, events) = mpsc::unbounded_channel();
            let (ctx, peer_rx) = SessionContext::new(
                role,
                config,
                signaling,
                IceServerSource::fixed(Vec::new()),
                events_tx,
            );
            Self { ctx, peer_rx, events, relay }
        }

        pub(crate) fn drain_events(&mut self) -> Vec<SessionEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        /// Relay-bound messages sent so far, as JSON values
        pub(crate) fn drain_relay(&mut self) -> Vec<serde_json::Value> {
            let mut out = Vec::new();
            while let Ok(msg) = self.relay.try_recv() {
                if let Message::Text(text) = msg {
                    let text: &str = text.as_ref();
                    out.push(serde_json::from_str(text).unwrap());
                }
            }
            out
        }
    }

    #[tokio::test]
    async fn test_begin_negotiation_closes_previous_connection_once() {
        let mut h = Harness::new(Role::Offerer);
        let first = h.ctx.begin_negotiation().await;
        let pc1 = h.ctx.peers.create_peer_connection(&[]).await.unwrap();
        assert!(h.ctx.attach_connection(first, pc1.clone()));
        assert_eq!(h.ctx.state(), PeerState::Negotiating);

        let second = h.ctx.begin_negotiation().await;
        assert_ne!(first, second);
        assert!(!h.ctx.is_current(first));
        assert_eq!(pc1.connection_state(), RTCPeerConnectionState::Closed);

        let states: Vec<_> = h
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                PeerState::Negotiating,
                PeerState::Closed,
                PeerState::Idle,
                PeerState::Negotiating
            ]
        );

        assert!(h.ctx.teardown().await);
        assert!(!h.ctx.teardown().await);
    }

    #[tokio::test]
    async fn test_stale_peer_events_are_dropped() {
        let mut h = Harness::new(Role::Answerer);
        let old = h.ctx.begin_negotiation().await;
        h.ctx.begin_negotiation().await;
        h.drain_events();

        let flow = h
            .ctx
            .handle_peer_event(PeerEvent::ChannelOpen { generation: old })
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(h.ctx.state(), PeerState::Negotiating);
        assert!(h.drain_events().is_empty());
    }

    #[tokio::test]
    async fn test_answerer_receives_and_saves_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.transfer.output_dir = dir.path().to_path_buf();
        let mut h = Harness::with_config(Role::Answerer, config);
        let generation = h.ctx.begin_negotiation().await;
        h.ctx.handle_peer_event(PeerEvent::ChannelOpen { generation }).await.unwrap();
        assert_eq!(h.ctx.state(), PeerState::Connected);

        let meta = r#"{"type":"metadata","fileName":"x.bin","fileSize":4,"fileType":"application/octet-stream"}"#;
        h.ctx
            .handle_peer_event(PeerEvent::ChannelMessage {
                generation,
                payload: ChannelPayload::Text(meta.to_string()),
            })
            .await
            .unwrap();
        let flow = h
            .ctx
            .handle_peer_event(PeerEvent::ChannelMessage {
                generation,
                payload: ChannelPayload::Binary(bytes::Bytes::from_static(b"abcd")),
            })
            .await
            .unwrap();
        assert_eq!(flow, Flow::TransferDone);

        let events = h.drain_events();
        assert!(events.contains(&SessionEvent::Progress { percent: 100 }));
        assert!(events.contains(&SessionEvent::TransferComplete));
        let saved = events
            .iter()
            .find_map(|e| match e {
                SessionEvent::FileReceived { path, .. } => Some(path.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(std::fs::read(saved).unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn test_malformed_metadata_is_fatal() {
        let mut h = Harness::new(Role::Answerer);
        let generation = h.ctx.begin_negotiation().await;
        let result = h
            .ctx
            .handle_peer_event(PeerEvent::ChannelMessage {
                generation,
                payload: ChannelPayload::Text("{oops".to_string()),
            })
            .await;
        assert!(matches!(result, Err(ClientError::Transfer(TransferError::MalformedMetadata(_)))));
        assert_eq!(h.ctx.state(), PeerState::Closed);
        assert!(h.drain_events().iter().any(|e| matches!(e, SessionEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_offerer_completes_on_full_ack() {
        let mut h = Harness::new(Role::Offerer);
        let generation = h.ctx.begin_negotiation().await;
        let ack = |p: u8| PeerEvent::ChannelMessage {
            generation,
            payload: ChannelPayload::Text(format!(r#"{{"type":"progress","percent":{}}}"#, p)),
        };

        assert_eq!(h.ctx.handle_peer_event(ack(50)).await.unwrap(), Flow::Continue);
        assert_eq!(h.ctx.handle_peer_event(ack(100)).await.unwrap(), Flow::TransferDone);
        let events = h.drain_events();
        assert!(events.contains(&SessionEvent::Progress { percent: 50 }));
        assert!(events.contains(&SessionEvent::TransferComplete));

        // Closing after completion is not an error.
        h.ctx.handle_peer_event(PeerEvent::ChannelClosed { generation }).await.unwrap();
        assert!(!h.drain_events().iter().any(|e| matches!(e, SessionEvent::Error(_))));
        assert_eq!(h.ctx.state(), PeerState::Closed);
    }

    #[tokio::test]
    async fn test_channel_closed_mid_transfer_reports_error() {
        let mut h = Harness::new(Role::Offerer);
        let generation = h.ctx.begin_negotiation().await;
        h.ctx.handle_peer_event(PeerEvent::ChannelClosed { generation }).await.unwrap();
        assert!(h.drain_events().iter().any(|e| matches!(e, SessionEvent::Error(_))));
        assert_eq!(h.ctx.state(), PeerState::Closed);
    }

    #[tokio::test]
    async fn test_reset_attempt_clears_counters() {
        let mut h = Harness::new(Role::Answerer);
        h.ctx.candidates.offer(crate::webrtc::IceCandidate {
            candidate: "candidate:1 1 udp 1 127.0.0.1 1 typ host".to_string(),
            sdp_mid: None,
            sdp_mline_index: Some(0),
            username_fragment: None,
        });
        h.ctx
            .receiver
            .handle_text(r#"{"type":"metadata","fileName":"a","fileSize":10,"fileType":""}"#)
            .unwrap();
        h.ctx.begin_negotiation().await;

        h.ctx.reset_attempt().await;
        assert!(h.ctx.candidates.is_empty());
        assert_eq!(h.ctx.receiver.metadata(), None);
        assert_eq!(h.ctx.state(), PeerState::Idle);
        assert!(h.ctx.connection().is_none());
    }

    /// Hand a relay-bound signal to the other side as the relay would.
    async fn relay_signal(msg: Message, router: &dyn MessageRouter, ctx: &mut SessionContext) {
        let Message::Text(text) = msg else {
            return;
        };
        let text: &str = text.as_ref();
        if let Ok(ClientMessage::Signal { data }) = serde_json::from_str(text) {
            router.route(ServerMessage::Signal { data }, ctx).await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_file_crosses_a_real_data_channel() {
        let source: Vec<u8> = (0..1_048_576u32).map(|i| (i * 31 % 251) as u8).collect();
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let path = input.path().join("payload.bin");
        std::fs::write(&path, &source).unwrap();

        let mut config = Config::default();
        config.webrtc.include_loopback_candidates = true;
        config.transfer.output_dir = output.path().to_path_buf();

        let mut offerer = Harness::with_config(Role::Offerer, config.clone());
        let outgoing = OutgoingFile::inspect(&path).await.unwrap();
        offerer.ctx = offerer.ctx.with_outgoing(outgoing);
        let mut answerer = Harness::with_config(Role::Answerer, config);

        OffererRouter
            .route(ServerMessage::PeerJoined { peer_count: 2 }, &mut offerer.ctx)
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        let (mut sent, mut received) = (false, false);
        let mut answerer_events = Vec::new();
        while !(sent && received) {
            tokio::select! {
                Some(msg) = offerer.relay.recv() => {
                    relay_signal(msg, &AnswererRouter, &mut answerer.ctx).await;
                }
                Some(msg) = answerer.relay.recv() => {
                    relay_signal(msg, &OffererRouter, &mut offerer.ctx).await;
                }
                Some(event) = offerer.peer_rx.recv() => {
                    if offerer.ctx.handle_peer_event(event).await.unwrap() == Flow::TransferDone {
                        sent = true;
                    }
                }
                Some(event) = answerer.peer_rx.recv() => {
                    if answerer.ctx.handle_peer_event(event).await.unwrap() == Flow::TransferDone {
                        received = true;
                    }
                    answerer_events.extend(answerer.drain_events());
                }
                _ = tokio::time::sleep_until(deadline) => panic!("transfer did not finish in time"),
            }
        }

        let percents: Vec<u8> = answerer_events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Progress { percent } => Some(*percent),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]), "{:?}", percents);
        assert_eq!(percents.last(), Some(&100));

        let saved = answerer_events
            .iter()
            .find_map(|e| match e {
                SessionEvent::FileReceived { path, .. } => Some(path.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(std::fs::read(saved).unwrap(), source);
        assert!(offerer.drain_events().contains(&SessionEvent::TransferComplete));

        offerer.ctx.teardown().await;
        answerer.ctx.teardown().await;
    }
}
