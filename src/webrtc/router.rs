//! Per-role relay message routing
//!
//! Each role accepts a fixed set of relay message kinds. Anything else is
//! logged at debug level and dropped.

use super::negotiation;
use super::session::{SessionContext, SessionEvent};
use super::signaling::{error_codes, ServerMessage};
use crate::client::ClientError;
use async_trait::async_trait;
use log::{debug, info, warn};

#[async_trait]
pub trait MessageRouter: Send + Sync {
    async fn route(&self, message: ServerMessage, ctx: &mut SessionContext) -> Result<(), ClientError>;
}

/// Routes relay messages for the sending side
#[derive(Debug, Default, Clone, Copy)]
pub struct OffererRouter;

/// Routes relay messages for the receiving side
#[derive(Debug, Default, Clone, Copy)]
pub struct AnswererRouter;

#[async_trait]
impl MessageRouter for OffererRouter {
    async fn route(&self, message: ServerMessage, ctx: &mut SessionContext) -> Result<(), ClientError> {
        match message {
            ServerMessage::RoomCreated { room_id } => {
                info!("Room {} created", room_id);
                ctx.mark_room_established();
                let share_url = ctx.config().signaling.share_url(&room_id);
                ctx.set_room_id(room_id.clone());
                ctx.emit(SessionEvent::RoomCreated { room_id, share_url });
                Ok(())
            }
            ServerMessage::PeerJoined { peer_count } => {
                info!("Peer joined ({} in room)", peer_count);
                ctx.emit(SessionEvent::PeerJoined { peer_count });
                negotiation::start_offer(ctx).await
            }
            ServerMessage::PeerLeft { peer_count } => {
                ctx.emit(SessionEvent::PeerLeft { peer_count });
                if ctx.acks.is_complete() {
                    info!("Peer left after the transfer completed");
                } else {
                    warn!("Peer left before the transfer completed; waiting for another");
                }
                ctx.reset_attempt().await;
                Ok(())
            }
            ServerMessage::Signal { data } => negotiation::handle_signal(ctx, &data).await,
            ServerMessage::Error { code, message } => server_error(ctx, code, message),
            other => {
                debug!("Offerer dropping {} message", other.kind());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MessageRouter for AnswererRouter {
    async fn route(&self, message: ServerMessage, ctx: &mut SessionContext) -> Result<(), ClientError> {
        match message {
            ServerMessage::RoomJoined => {
                let room_id = ctx.room_id().unwrap_or_default().to_string();
                info!("Joined room {}", room_id);
                ctx.mark_room_established();
                ctx.emit(SessionEvent::RoomJoined { room_id });
                Ok(())
            }
            ServerMessage::RoomExists { exists, has_password } => {
                ctx.emit(SessionEvent::RoomStatus { exists, has_password });
                Ok(())
            }
            ServerMessage::PeerLeft { peer_count } => {
                ctx.emit(SessionEvent::PeerLeft { peer_count });
                let complete = ctx.receiver.state() == crate::transfer::ReceiveState::Complete;
                ctx.reset_attempt().await;
                if complete {
                    info!("Sender left after the transfer completed");
                    Ok(())
                } else {
                    Err(ClientError::PeerLeft)
                }
            }
            ServerMessage::Signal { data } => negotiation::handle_signal(ctx, &data).await,
            ServerMessage::Error { code, message } => server_error(ctx, code, message),
            other => {
                debug!("Answerer dropping {} message", other.kind());
                Ok(())
            }
        }
    }
}

/// Errors before the room exists end the session, as does losing room
/// membership later. Other errors are reported only.
fn server_error(ctx: &mut SessionContext, code: Option<String>, message: String) -> Result<(), ClientError> {
    warn!("Relay error {}: {}", code.as_deref().unwrap_or("-"), message);
    ctx.emit(SessionEvent::ServerError {
        code: code.clone(),
        message: message.clone(),
    });
    let evicted = code.as_deref() == Some(error_codes::NOT_IN_ROOM);
    if ctx.room_established() && !evicted {
        Ok(())
    } else {
        Err(ClientError::Server { code, message })
    }
}
