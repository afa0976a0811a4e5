//! Offer/answer negotiation
//!
//! The offerer builds a connection and data channel when a peer joins and
//! sends the offer; the answerer builds its connection when the offer
//! arrives. Remote candidates that show up before the remote description is
//! applied are held in the session's [`CandidateQueue`](super::CandidateQueue)
//! and replayed, in arrival order, right after it is.
//!
//! A failed step is surfaced as a session error and closes the attempt.
//! Only relay errors are returned, since nothing else can be done without
//! the relay.

use super::data_channel::DataChannelLink;
use super::peer_connection::PeerConnectionManager;
use super::session::{PeerEvent, PeerState, Role, SessionContext};
use super::signaling::{ClientMessage, IceCandidate, NegotiationSignal};
use super::PeerError;
use crate::client::ClientError;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use webrtc::peer_connection::RTCPeerConnection;

/// Offerer: a peer joined the room
pub async fn start_offer(ctx: &mut SessionContext) -> Result<(), ClientError> {
    let generation = ctx.begin_negotiation().await;
    info!("Session {} sending offer (attempt #{})", ctx.id, generation);
    let result = send_offer(ctx, generation).await;
    settle(ctx, result).await
}

/// Answerer: an offer arrived
pub async fn accept_offer(ctx: &mut SessionContext, sdp: &str) -> Result<(), ClientError> {
    let generation = ctx.begin_negotiation().await;
    info!("Session {} answering offer (attempt #{})", ctx.id, generation);
    let result = send_answer(ctx, generation, sdp).await;
    settle(ctx, result).await
}

/// Offerer: the answer to our offer arrived
pub async fn accept_answer(ctx: &mut SessionContext, sdp: &str) -> Result<(), ClientError> {
    let connection = match ctx.connection() {
        Some(pc) if ctx.state() == PeerState::Negotiating => pc,
        _ => {
            warn!(
                "Session {} ignoring answer in state {:?}",
                ctx.id,
                ctx.state()
            );
            return Ok(());
        }
    };

    let result = apply_answer(ctx, &connection, sdp).await;
    settle(ctx, result).await
}

/// Queue or apply a remote ICE candidate
pub async fn add_remote_candidate(ctx: &mut SessionContext, candidate: IceCandidate) {
    let Some(candidate) = ctx.candidates.offer(candidate) else {
        debug!("Session {} queued remote candidate ({} pending)", ctx.id, ctx.candidates.len());
        return;
    };

    match ctx.connection() {
        Some(pc) => apply_candidate(&pc, candidate).await,
        None => debug!("Session {} has no peer connection; dropping candidate", ctx.id),
    }
}

/// Dispatch a relay `Signal` payload according to the session's role
pub async fn handle_signal(ctx: &mut SessionContext, data: &Value) -> Result<(), ClientError> {
    let signal = match NegotiationSignal::from_value(data) {
        Ok(signal) => signal,
        Err(e) => {
            warn!("Session {} ignoring signal: {}", ctx.id, e);
            return Ok(());
        }
    };

    match (ctx.role(), signal) {
        (Role::Answerer, NegotiationSignal::Offer { sdp }) => accept_offer(ctx, &sdp).await,
        (Role::Offerer, NegotiationSignal::Answer { sdp }) => accept_answer(ctx, &sdp).await,
        (_, NegotiationSignal::Candidate { candidate }) => {
            add_remote_candidate(ctx, candidate).await;
            Ok(())
        }
        (role, other) => {
            warn!("{:?} ignoring unexpected {} signal", role, other.kind());
            Ok(())
        }
    }
}

async fn settle(ctx: &mut SessionContext, result: Result<(), ClientError>) -> Result<(), ClientError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            ctx.fail(format!("Negotiation failed: {}", e)).await;
            match e {
                ClientError::Signaling(_) => Err(e),
                _ => Ok(()),
            }
        }
    }
}

/// Create a peer connection for `generation` with ICE and state callbacks
/// wired back into the session.
async fn open_connection(ctx: &mut SessionContext, generation: u64) -> Result<Arc<RTCPeerConnection>, PeerError> {
    let servers = ctx.ice.servers().await;
    let pc = ctx.peers.create_peer_connection(&servers).await?;

    if !ctx.attach_connection(generation, pc.clone()) {
        PeerConnectionManager::close(&pc).await?;
        return Err(PeerError::InvalidState(format!(
            "attempt #{} was superseded",
            generation
        )));
    }

    let signaling = ctx.signaling();
    PeerConnectionManager::setup_ice_callback(&pc, move |candidate| {
        let sent = ClientMessage::signal(&NegotiationSignal::Candidate { candidate })
            .and_then(|message| signaling.send(&message));
        if let Err(e) = sent {
            debug!("Local ICE candidate not sent: {}", e);
        }
    });

    let events = ctx.peer_events();
    PeerConnectionManager::setup_state_callback(&pc, move |state| {
        let _ = events.send(PeerEvent::ConnectionState { generation, state });
    });

    Ok(pc)
}

async fn send_offer(ctx: &mut SessionContext, generation: u64) -> Result<(), ClientError> {
    let pc = open_connection(ctx, generation).await?;

    let label = ctx.config().webrtc.data_channel_label.clone();
    let channel = PeerConnectionManager::create_data_channel(&pc, &label).await?;
    let link = DataChannelLink::new(channel);
    let config = ctx.config();
    let (low_water_mark, max_message_size) =
        (config.transfer.low_water_mark, config.webrtc.max_message_size as usize);
    link.attach(generation, low_water_mark, max_message_size, ctx.peer_events())
        .await;
    ctx.attach_channel(generation, link);

    let sdp = ctx.peers.create_offer(&pc).await?;
    ctx.send(&ClientMessage::signal(&NegotiationSignal::Offer { sdp })?)?;
    Ok(())
}

async fn send_answer(ctx: &mut SessionContext, generation: u64, sdp: &str) -> Result<(), ClientError> {
    let pc = open_connection(ctx, generation).await?;

    let events = ctx.peer_events();
    let low_water_mark = ctx.config().transfer.low_water_mark;
    let max_message_size = ctx.config().webrtc.max_message_size as usize;
    PeerConnectionManager::setup_data_channel_callback(&pc, move |channel| {
        let events = events.clone();
        async move {
            let link = DataChannelLink::new(channel);
            let _ = events.send(PeerEvent::RemoteChannel {
                generation,
                link: link.clone(),
            });
            link.attach(generation, low_water_mark, max_message_size, events).await;
        }
    });

    PeerConnectionManager::handle_offer(&pc, sdp).await?;
    replay_candidates(ctx, &pc).await;

    let sdp = ctx.peers.create_answer(&pc).await?;
    ctx.send(&ClientMessage::signal(&NegotiationSignal::Answer { sdp })?)?;
    Ok(())
}

async fn apply_answer(ctx: &mut SessionContext, pc: &Arc<RTCPeerConnection>, sdp: &str) -> Result<(), ClientError> {
    PeerConnectionManager::handle_answer(pc, sdp).await?;
    replay_candidates(ctx, pc).await;
    Ok(())
}

async fn replay_candidates(ctx: &mut SessionContext, pc: &Arc<RTCPeerConnection>) {
    let pending = ctx.candidates.mark_remote_description_set();
    if !pending.is_empty() {
        debug!("Session {} applying {} queued candidate(s)", ctx.id, pending.len());
    }
    for candidate in pending {
        apply_candidate(pc, candidate).await;
    }
}

/// A single bad candidate does not doom the connection; ICE may still
/// succeed over the others.
async fn apply_candidate(pc: &Arc<RTCPeerConnection>, candidate: IceCandidate) {
    if let Err(e) = PeerConnectionManager::add_ice_candidate(pc, candidate).await {
        warn!("{}", e);
    }
}
