//! Node configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rate_limit::RateLimitPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identifier of this device
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Name stamped on status changes when the caller gives none
    #[serde(default = "default_staff_name")]
    pub staff_name: String,
}

/// Which document-store adapter to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    /// HTTP + WebSocket gateway
    #[default]
    Http,
    /// In-process loopback store
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Disabled means local-only mode
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: RemoteBackend,

    /// Gateway base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// WebSocket base URL (derived from `base_url` when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,

    /// Bearer token for the gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Upper bound on one report write
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Upper bound on one media upload
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Fixed delay between reconnection attempts while offline
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Observation window in seconds
    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Submissions allowed per window
    #[serde(default = "default_max_submissions")]
    pub max_submissions: usize,

    /// Ban length in seconds
    #[serde(default = "default_ban")]
    pub ban_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Maximum number of reports kept on the device
    #[serde(default = "default_max_reports")]
    pub max_reports: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

// Defaults
fn default_device_id() -> String {
    format!("device-{}", uuid::Uuid::new_v4().simple())
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/safespeak")
}
fn default_staff_name() -> String {
    "School board".to_string()
}
fn default_true() -> bool {
    true
}
fn default_base_url() -> String {
    "http://localhost:8088".to_string()
}
fn default_write_timeout() -> u64 {
    30
}
fn default_upload_timeout() -> u64 {
    45
}
fn default_reconnect_interval() -> u64 {
    10
}
fn default_window() -> u64 {
    10 * 60
}
fn default_max_submissions() -> usize {
    5
}
fn default_ban() -> u64 {
    60
}
fn default_max_reports() -> usize {
    10_000
}
fn default_http_port() -> u16 {
    8080
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            data_dir: default_data_dir(),
            staff_name: default_staff_name(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: RemoteBackend::default(),
            base_url: default_base_url(),
            ws_url: None,
            api_key: None,
            write_timeout_secs: default_write_timeout(),
            upload_timeout_secs: default_upload_timeout(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_secs: default_reconnect_interval(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window(),
            max_submissions: default_max_submissions(),
            ban_secs: default_ban(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_reports: default_max_reports(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
            rate_limit: RateLimitConfig::default(),
            storage: StorageConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file, or fall back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

impl RemoteConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    /// WebSocket base, derived from the HTTP base when not set explicitly.
    pub fn resolved_ws_url(&self) -> String {
        match &self.ws_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let base = self.base_url.trim_end_matches('/');
                if let Some(rest) = base.strip_prefix("https://") {
                    format!("wss://{}", rest)
                } else if let Some(rest) = base.strip_prefix("http://") {
                    format!("ws://{}", rest)
                } else {
                    base.to_string()
                }
            }
        }
    }
}

impl SyncConfig {
    /// Retry period, never shorter than one second.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs.max(1))
    }
}

impl RateLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            window_ms: self.window_secs * 1000,
            max_submissions: self.max_submissions,
            ban_ms: self.ban_secs * 1000,
        }
    }
}
