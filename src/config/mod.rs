//! Configuration management for filecoffee

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Relay (signaling + HTTP API) configuration
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// WebRTC configuration
    #[serde(default)]
    pub webrtc: WebRTCConfig,

    /// Transfer engine configuration
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// WebSocket URL of the relay
    #[serde(default = "default_signaling_url")]
    pub url: String,

    /// HTTP base URL of the relay API; derived from `url` when absent
    #[serde(default)]
    pub api_url: Option<String>,

    /// Web origin used to print share links
    #[serde(default)]
    pub share_url_base: Option<String>,

    /// WebSocket connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// WebSocket ping interval in seconds (0 disables)
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: default_signaling_url(),
            api_url: None,
            share_url_base: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            keepalive_secs: default_keepalive_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SignalingConfig {
    /// HTTP base of the relay API.
    ///
    /// `ws://host/ws` maps to `http://host`, `wss://` to `https://`.
    pub fn resolved_api_url(&self) -> Result<Url, String> {
        if let Some(ref api) = self.api_url {
            return Url::parse(api).map_err(|e| format!("Invalid api_url {}: {}", api, e));
        }

        let mut url = Url::parse(&self.url)
            .map_err(|e| format!("Invalid signaling url {}: {}", self.url, e))?;
        let scheme = match url.scheme() {
            "ws" | "http" => "http",
            "wss" | "https" => "https",
            other => return Err(format!("Unsupported signaling scheme: {}", other)),
        };
        url.set_scheme(scheme)
            .map_err(|_| format!("Cannot derive API url from {}", self.url))?;
        url.set_path("");
        url.set_query(None);
        Ok(url)
    }

    /// Share link for a room, when a web origin is configured
    pub fn share_url(&self, room_id: &str) -> Option<String> {
        self.share_url_base
            .as_ref()
            .map(|base| format!("{}/download/{}", base.trim_end_matches('/'), room_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRTCConfig {
    /// Static ICE servers; when non-empty the relay lookup is skipped
    #[serde(default)]
    pub ice_servers: Vec<IceServerConfig>,

    /// STUN server used when the relay lookup fails
    #[serde(default = "default_fallback_stun_url")]
    pub fallback_stun_url: String,

    /// Label of the transfer data channel
    #[serde(default = "default_data_channel_label")]
    pub data_channel_label: String,

    /// Ephemeral UDP port range for ICE host candidates, e.g. [50000, 50100]
    #[serde(default)]
    pub udp_port_range: Option<[u16; 2]>,

    /// Largest SCTP message this client advertises and sends
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u32,

    /// Gather loopback host candidates, for hosts reachable only on lo
    #[serde(default)]
    pub include_loopback_candidates: bool,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            fallback_stun_url: default_fallback_stun_url(),
            data_channel_label: default_data_channel_label(),
            udp_port_range: None,
            max_message_size: default_max_message_size(),
            include_loopback_candidates: false,
        }
    }
}

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs
    pub urls: Vec<String>,
    /// Username for TURN
    #[serde(default)]
    pub username: Option<String>,
    /// Credential for TURN
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Size of each binary slice in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Sending pauses while the channel buffers more than this many bytes
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Sending resumes once the channel buffer drains below this
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,

    /// Directory received files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            high_water_mark: default_high_water_mark(),
            low_water_mark: default_low_water_mark(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let signaling = Url::parse(&self.signaling.url)
            .map_err(|e| format!("Invalid signaling url: {}", e))?;
        if signaling.scheme() != "ws" && signaling.scheme() != "wss" {
            return Err("Signaling url must use ws:// or wss://".into());
        }

        if let Some(ref api) = self.signaling.api_url {
            let api = Url::parse(api).map_err(|e| format!("Invalid api_url: {}", e))?;
            if api.scheme() != "http" && api.scheme() != "https" {
                return Err("Signaling api_url must use http:// or https://".into());
            }
        }

        if self.signaling.connect_timeout_secs == 0 {
            return Err("Signaling connect timeout must be non-zero".into());
        }

        if self.signaling.request_timeout_secs == 0 {
            return Err("Signaling request timeout must be non-zero".into());
        }

        if self.transfer.chunk_size == 0 {
            return Err("Transfer chunk size must be non-zero".into());
        }

        if self.transfer.chunk_size > self.webrtc.max_message_size as usize {
            return Err("Transfer chunk size cannot exceed WebRTC max message size".into());
        }

        if self.transfer.low_water_mark >= self.transfer.high_water_mark {
            return Err("Transfer low water mark must be below the high water mark".into());
        }

        if self.webrtc.data_channel_label.is_empty() {
            return Err("WebRTC data channel label must not be empty".into());
        }

        if let Some([start, end]) = self.webrtc.udp_port_range {
            if start == 0 || start > end {
                return Err("WebRTC udp_port_range must be an ordered, non-zero range".into());
            }
        }

        for server in &self.webrtc.ice_servers {
            if server.urls.is_empty() {
                return Err("WebRTC ice_servers entries need at least one url".into());
            }
        }

        Ok(())
    }
}

fn default_signaling_url() -> String {
    "ws://localhost:3030/ws".to_string()
}

fn default_fallback_stun_url() -> String {
    "stun:stun.l.google.com:19302".to_string()
}

fn default_data_channel_label() -> String {
    "fileTransfer".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout_secs() -> u64 { 10 }
fn default_keepalive_secs() -> u64 { 30 }
fn default_request_timeout_secs() -> u64 { 5 }
fn default_max_message_size() -> u32 { 1024 * 1024 }
fn default_chunk_size() -> usize { 256 * 1024 }
fn default_high_water_mark() -> usize { 64 * 1024 * 1024 }
fn default_low_water_mark() -> usize { 1024 * 1024 }
