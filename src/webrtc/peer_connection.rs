//! WebRTC PeerConnection management
//!
//! Handles the creation of RTCPeerConnection instances and the SDP/ICE
//! primitives the negotiation paths are built from.

use super::signaling::IceCandidate;
use super::PeerError;
use crate::config::{IceServerConfig, WebRTCConfig};
use std::future::Future;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::{SctpMaxMessageSize, SettingEngine};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

const MAX_MESSAGE_SIZE_ATTR: &str = "a=max-message-size:";

/// PeerConnection manager for transfer sessions
#[derive(Debug, Clone)]
pub struct PeerConnectionManager {
    config: WebRTCConfig,
}

impl PeerConnectionManager {
    /// Create a new PeerConnection manager
    pub fn new(config: WebRTCConfig) -> Self {
        Self { config }
    }

    /// Create a new PeerConnection using the given ICE servers
    pub async fn create_peer_connection(
        &self,
        ice_servers: &[IceServerConfig],
    ) -> Result<Arc<RTCPeerConnection>, PeerError> {
        let mut setting_engine = SettingEngine::default();

        if let Some(range) = self.config.udp_port_range {
            let ephemeral = EphemeralUDP::new(range[0], range[1])
                .map_err(|e| PeerError::ConnectionFailed(format!("Invalid ICE UDP port range: {}", e)))?;
            setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
        }

        setting_engine.set_sctp_max_message_size_can_send(SctpMaxMessageSize::Bounded(
            self.config.max_message_size,
        ));
        // Channels are read through DataChannelLink's own loop.
        setting_engine.detach_data_channels();
        if self.config.include_loopback_candidates {
            setting_engine.set_include_loopback_candidate(true);
        }

        let mut media_engine = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| PeerError::ConnectionFailed(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let ice_servers = ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| PeerError::ConnectionFailed(format!("Failed to create peer connection: {}", e)))?;

        Ok(Arc::new(peer_connection))
    }

    /// Set up connection state change callback
    pub fn setup_state_callback(
        peer_connection: &Arc<RTCPeerConnection>,
        callback: impl Fn(RTCPeerConnectionState) + Send + Sync + 'static,
    ) {
        let callback = Arc::new(callback);
        peer_connection.on_peer_connection_state_change(Box::new(move |state| {
            let callback = callback.clone();
            Box::pin(async move {
                callback(state);
            })
        }));
    }

    /// Set up ICE candidate callback; end-of-gathering is not forwarded
    pub fn setup_ice_callback(
        peer_connection: &Arc<RTCPeerConnection>,
        callback: impl Fn(IceCandidate) + Send + Sync + 'static,
    ) {
        let callback = Arc::new(callback);
        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let callback = callback.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => callback(IceCandidate::from(init)),
                    Err(e) => log::warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));
    }

    /// Set up the callback for channels opened by the remote peer. The
    /// returned future runs before the channel delivers any message.
    pub fn setup_data_channel_callback<F, Fut>(peer_connection: &Arc<RTCPeerConnection>, callback: F)
    where
        F: Fn(Arc<RTCDataChannel>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback = Arc::new(callback);
        peer_connection.on_data_channel(Box::new(move |channel| {
            let callback = callback.clone();
            Box::pin(async move {
                callback(channel).await;
            })
        }));
    }

    /// Create an SDP offer and commit it locally. Returns the SDP to send.
    pub async fn create_offer(&self, peer_connection: &Arc<RTCPeerConnection>) -> Result<String, PeerError> {
        let offer = peer_connection.create_offer(None).await
            .map_err(|e| PeerError::SdpError(format!("Failed to create offer: {}", e)))?;

        peer_connection.set_local_description(offer.clone()).await
            .map_err(|e| PeerError::SdpError(format!("Failed to set local description: {}", e)))?;

        Ok(advertise_max_message_size(&offer.sdp, self.config.max_message_size))
    }

    /// Apply a remote SDP offer
    pub async fn handle_offer(peer_connection: &Arc<RTCPeerConnection>, sdp: &str) -> Result<(), PeerError> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| PeerError::SdpError(format!("Invalid SDP offer: {}", e)))?;

        peer_connection.set_remote_description(offer).await
            .map_err(|e| PeerError::SdpError(format!("Failed to set remote description: {}", e)))?;

        Ok(())
    }

    /// Create an SDP answer and commit it locally. Returns the SDP to send.
    pub async fn create_answer(&self, peer_connection: &Arc<RTCPeerConnection>) -> Result<String, PeerError> {
        let answer = peer_connection.create_answer(None).await
            .map_err(|e| PeerError::SdpError(format!("Failed to create answer: {}", e)))?;

        peer_connection.set_local_description(answer.clone()).await
            .map_err(|e| PeerError::SdpError(format!("Failed to set local description: {}", e)))?;

        Ok(advertise_max_message_size(&answer.sdp, self.config.max_message_size))
    }

    /// Apply a remote SDP answer
    pub async fn handle_answer(peer_connection: &Arc<RTCPeerConnection>, sdp: &str) -> Result<(), PeerError> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| PeerError::SdpError(format!("Invalid SDP answer: {}", e)))?;

        peer_connection.set_remote_description(answer).await
            .map_err(|e| PeerError::SdpError(format!("Failed to set remote description: {}", e)))?;

        Ok(())
    }

    /// Add a remote ICE candidate
    pub async fn add_ice_candidate(
        peer_connection: &Arc<RTCPeerConnection>,
        candidate: IceCandidate,
    ) -> Result<(), PeerError> {
        peer_connection.add_ice_candidate(candidate.into()).await
            .map_err(|e| PeerError::IceError(format!("Failed to add ICE candidate: {}", e)))?;

        Ok(())
    }

    /// Create the ordered, reliable transfer channel
    pub async fn create_data_channel(
        peer_connection: &Arc<RTCPeerConnection>,
        label: &str,
    ) -> Result<Arc<RTCDataChannel>, PeerError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let channel = peer_connection.create_data_channel(label, Some(init)).await
            .map_err(|e| PeerError::DataChannelError(format!("Failed to create data channel: {}", e)))?;

        Ok(channel)
    }

    /// Close a peer connection
    pub async fn close(peer_connection: &Arc<RTCPeerConnection>) -> Result<(), PeerError> {
        peer_connection.close().await
            .map_err(|e| PeerError::ConnectionFailed(format!("Failed to close connection: {}", e)))?;
        Ok(())
    }
}

/// Make the SDP advertise `size` as the largest message we accept.
fn advertise_max_message_size(sdp: &str, size: u32) -> String {
    let attr = format!("{}{}", MAX_MESSAGE_SIZE_ATTR, size);
    if sdp.contains(MAX_MESSAGE_SIZE_ATTR) {
        return sdp
            .split("\r\n")
            .map(|line| if line.starts_with(MAX_MESSAGE_SIZE_ATTR) { attr.as_str() } else { line })
            .collect::<Vec<_>>()
            .join("\r\n");
    }

    let mut out = sdp.to_string();
    if !out.is_empty() && !out.ends_with("\r\n") {
        out.push_str("\r\n");
    }
    out.push_str(&attr);
    out.push_str("\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PeerConnectionManager {
        PeerConnectionManager::new(WebRTCConfig::default())
    }

    #[test]
    fn test_advertise_appends_or_replaces() {
        let sdp = "v=0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n";
        let out = advertise_max_message_size(sdp, 1024);
        assert!(out.ends_with("a=max-message-size:1024\r\n"));

        let out = advertise_max_message_size("v=0\r\na=max-message-size:65536\r\na=x\r\n", 1024);
        assert_eq!(out, "v=0\r\na=max-message-size:1024\r\na=x\r\n");
    }

    #[tokio::test]
    async fn test_offer_answer_between_local_peers() {
        let manager = manager();
        let offerer = manager.create_peer_connection(&[]).await.unwrap();
        let answerer = manager.create_peer_connection(&[]).await.unwrap();

        PeerConnectionManager::create_data_channel(&offerer, "fileTransfer").await.unwrap();
        let offer = manager.create_offer(&offerer).await.unwrap();
        assert!(offer.starts_with("v=0"));
        assert!(offer.contains("a=max-message-size:1048576"));

        PeerConnectionManager::handle_offer(&answerer, &offer).await.unwrap();
        let answer = manager.create_answer(&answerer).await.unwrap();
        PeerConnectionManager::handle_answer(&offerer, &answer).await.unwrap();
        assert!(offerer.remote_description().await.is_some());

        PeerConnectionManager::close(&offerer).await.unwrap();
        PeerConnectionManager::close(&answerer).await.unwrap();
    }

    #[tokio::test]
    async fn test_candidate_without_remote_description_is_rejected() {
        let pc = manager().create_peer_connection(&[]).await.unwrap();
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 127.0.0.1 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        assert!(PeerConnectionManager::add_ice_candidate(&pc, candidate).await.is_err());
        PeerConnectionManager::close(&pc).await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_offer_is_an_sdp_error() {
        let pc = manager().create_peer_connection(&[]).await.unwrap();
        let err = PeerConnectionManager::handle_offer(&pc, "not an sdp").await.unwrap_err();
        assert!(matches!(err, PeerError::SdpError(_)));
        PeerConnectionManager::close(&pc).await.unwrap();
    }
}
