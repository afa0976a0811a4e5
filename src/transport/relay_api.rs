//! Relay HTTP API: ICE server lookup and room existence check.

use super::SignalingError;
use crate::config::{IceServerConfig, SignalingConfig, WebRTCConfig};
use log::{debug, info, warn};
use serde::Deserialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

/// Room lookup result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RoomStatus {
    pub exists: bool,
    #[serde(alias = "hasPassword", default)]
    pub has_password: bool,
}

#[derive(Deserialize)]
struct IceServersResponse {
    #[serde(rename = "iceServers", alias = "ice_servers")]
    ice_servers: Vec<WireIceServer>,
}

#[derive(Deserialize)]
struct WireIceServer {
    urls: WireUrls,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    credential: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireUrls {
    One(String),
    Many(Vec<String>),
}

impl From<WireIceServer> for IceServerConfig {
    fn from(server: WireIceServer) -> Self {
        let urls = match server.urls {
            WireUrls::One(url) => vec![url],
            WireUrls::Many(urls) => urls,
        };
        Self {
            urls,
            username: server.username,
            credential: server.credential,
        }
    }
}

/// Client for the relay's HTTP endpoints
#[derive(Debug, Clone)]
pub struct RelayApi {
    client: reqwest::Client,
    base: Url,
}

impl RelayApi {
    pub fn new(config: &SignalingConfig) -> Result<Self, SignalingError> {
        let base = config.resolved_api_url().map_err(SignalingError::Http)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| SignalingError::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SignalingError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SignalingError::Http(format!("Relay API url {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `GET /api/ice-servers`
    pub async fn fetch_ice_servers(&self) -> Result<Vec<IceServerConfig>, SignalingError> {
        let url = self.endpoint(&["api", "ice-servers"])?;
        debug!("Fetching ICE servers from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SignalingError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| SignalingError::Http(e.to_string()))?;

        let body: IceServersResponse = response
            .json()
            .await
            .map_err(|e| SignalingError::Protocol(format!("Invalid ICE server list: {}", e)))?;

        Ok(body.ice_servers.into_iter().map(IceServerConfig::from).collect())
    }

    /// `GET /api/rooms/{id}`; a 404 means the room does not exist
    pub async fn check_room(&self, room_id: &str) -> Result<RoomStatus, SignalingError> {
        let url = self.endpoint(&["api", "rooms", room_id])?;
        debug!("Checking room at {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SignalingError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(RoomStatus { exists: false, has_password: false });
        }

        response
            .error_for_status()
            .map_err(|e| SignalingError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| SignalingError::Protocol(format!("Invalid room status: {}", e)))
    }
}

enum IceState {
    Pending(JoinHandle<Result<Vec<IceServerConfig>, SignalingError>>),
    Ready(Vec<IceServerConfig>),
}

/// ICE servers for new peer connections.
///
/// The relay lookup starts as soon as the source is created so negotiation
/// does not wait on it; a failed or empty lookup falls back to the public
/// STUN server. Relay-issued credentials can expire, so [`refresh`] starts
/// a new lookup for the next connection attempt.
///
/// [`refresh`]: IceServerSource::refresh
pub struct IceServerSource {
    state: IceState,
    fallback: Vec<IceServerConfig>,
    /// None for a fixed list
    api: Option<RelayApi>,
}

impl IceServerSource {
    pub fn prefetch(api: &RelayApi, config: &WebRTCConfig) -> Self {
        if !config.ice_servers.is_empty() {
            return Self::fixed(config.ice_servers.clone());
        }
        Self {
            state: IceState::Pending(spawn_lookup(api.clone())),
            fallback: fallback_ice_servers(config),
            api: Some(api.clone()),
        }
    }

    pub fn fixed(servers: Vec<IceServerConfig>) -> Self {
        Self {
            fallback: servers.clone(),
            state: IceState::Ready(servers),
            api: None,
        }
    }

    /// Start a fresh relay lookup, replacing any cached or pending result.
    /// Does nothing for a fixed list.
    pub fn refresh(&mut self) {
        let Some(api) = &self.api else {
            return;
        };
        debug!("Refreshing ICE servers");
        let next = IceState::Pending(spawn_lookup(api.clone()));
        if let IceState::Pending(handle) = std::mem::replace(&mut self.state, next) {
            handle.abort();
        }
    }

    pub async fn servers(&mut self) -> Vec<IceServerConfig> {
        let servers = match &mut self.state {
            IceState::Ready(servers) => return servers.clone(),
            IceState::Pending(handle) => match handle.await {
                Ok(Ok(servers)) if !servers.is_empty() => {
                    info!("Using {} ICE server(s) from relay", servers.len());
                    servers
                }
                Ok(Ok(_)) => {
                    warn!("Relay returned no ICE servers, using fallback STUN");
                    self.fallback.clone()
                }
                Ok(Err(e)) => {
                    warn!("ICE server lookup failed ({}), using fallback STUN", e);
                    self.fallback.clone()
                }
                Err(e) => {
                    warn!("ICE server lookup task failed ({}), using fallback STUN", e);
                    self.fallback.clone()
                }
            },
        };
        self.state = IceState::Ready(servers.clone());
        servers
    }
}

impl Drop for IceServerSource {
    fn drop(&mut self) {
        if let IceState::Pending(handle) = &self.state {
            handle.abort();
        }
    }
}

fn spawn_lookup(api: RelayApi) -> JoinHandle<Result<Vec<IceServerConfig>, SignalingError>> {
    tokio::spawn(async move { api.fetch_ice_servers().await })
}

pub fn fallback_ice_servers(config: &WebRTCConfig) -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec![config.fallback_stun_url.clone()],
        username: None,
        credential: None,
    }]
}
