//! Agent configuration loaded from a TOML file

use crate::connection::ConnectionConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "DEVICE_AGENT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/device-agent/agent.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub device: DeviceConfig,
    pub connection: ConnectionSettings,
    pub storage: StorageConfig,
    pub ota: OtaConfig,
    pub logging: LoggingConfig,
}

/// Identity and credentials of this device. Read-only to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device_id: String,
    pub project_id: String,
    /// Broker address as `host:port`
    pub broker_address: String,
    pub ca_cert_pem: Option<PathBuf>,
    pub client_cert_pem: Option<PathBuf>,
    pub client_key_pem: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: "1".into(),
            project_id: "demo".into(),
            broker_address: "127.0.0.1:1883".into(),
            ca_cert_pem: None,
            client_cert_pem: None,
            client_key_pem: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            connect_timeout_ms: 5_000,
            keepalive_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub record_path: PathBuf,
    pub firmware_dir: PathBuf,
    pub max_image_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            record_path: "/var/lib/device-agent/records.json".into(),
            firmware_dir: "/var/lib/device-agent/firmware".into(),
            max_image_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    /// Grace period between persisting the record and restarting, so queued
    /// status messages can leave the device
    pub restart_delay_ms: u64,
    pub http_connect_timeout_ms: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: 2_000,
            http_connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl AgentConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Load from the path named by `DEVICE_AGENT_CONFIG`, or the default path
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load(&path)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            device_id: self.device.device_id.clone(),
            project_id: self.device.project_id.clone(),
            reconnect_delay: Duration::from_millis(self.connection.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.connection.max_reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.connection.connect_timeout_ms),
            keepalive_interval: Duration::from_millis(self.connection.keepalive_interval_ms),
        }
    }
}
