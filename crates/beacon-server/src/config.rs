//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (BEACON_HOST, BEACON_PORT)
//! - TOML configuration file
//! - Command line (`--config <path>`)

use anyhow::{Context, Result};
use beacon_core::{HeartbeatConfig as CoreHeartbeatConfig, NotificationPolicy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration that cannot be served with.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Host and port do not form a socket address.
    #[error("Invalid bind address '{0}'")]
    InvalidBindAddr(String),

    /// A setting is out of range.
    #[error("Invalid setting {field}: {reason}")]
    Invalid {
        /// Dotted path of the setting.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Notification delivery bounds.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint. `/` shares the status route.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum inline media size in bytes.
    #[serde(default = "default_max_media_bytes")]
    pub max_media_bytes: usize,

    /// Longest a single outbound frame may take before the peer is
    /// treated as gone, in milliseconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Evict connections that do not answer a ping within one interval.
    #[serde(default = "default_true")]
    pub evict_on_missed_pong: bool,
}

/// Notification delivery bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Display duration when the publisher gives none, in seconds.
    #[serde(default = "default_duration_secs")]
    pub default_duration_secs: u64,

    /// Longest display duration, in seconds. Longer requests are clamped.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("BEACON_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("BEACON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_media_bytes() -> usize {
    8 * 1024 * 1024 // 8 MiB
}

fn default_send_timeout() -> u64 {
    5_000
}

/// Room in a publish body for everything but the base64 media.
const PUBLISH_ENVELOPE_BYTES: usize = 64 * 1024;

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_duration_secs() -> u64 {
    5
}

fn default_max_duration_secs() -> u64 {
    30
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            delivery: DeliveryConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_media_bytes: default_max_media_bytes(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            evict_on_missed_pong: true,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: default_duration_secs(),
            max_duration_secs: default_max_duration_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "beacon.toml",
            "/etc/beacon/beacon.toml",
            "~/.config/beacon/beacon.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check the settings that would otherwise fail at runtime.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        if !self.transport.websocket_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "transport.websocket_path",
                reason: "must start with '/'",
            });
        }
        if self.limits.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.send_timeout_ms",
                reason: "must be greater than zero",
            });
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "heartbeat.interval_ms",
                reason: "must be greater than zero",
            });
        }
        if self.delivery.max_duration_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "delivery.max_duration_secs",
                reason: "must be at least one second",
            });
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not parse as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::InvalidBindAddr(addr))
    }

    /// Publish bounds for the relay.
    #[must_use]
    pub fn notification_policy(&self) -> NotificationPolicy {
        NotificationPolicy {
            default_duration: Duration::from_secs(self.delivery.default_duration_secs),
            max_duration: Duration::from_secs(self.delivery.max_duration_secs),
            max_media_bytes: self.limits.max_media_bytes,
        }
    }

    /// Heartbeat settings for the relay.
    #[must_use]
    pub fn heartbeat_config(&self) -> CoreHeartbeatConfig {
        CoreHeartbeatConfig {
            interval: Duration::from_millis(self.heartbeat.interval_ms),
            evict_on_missed_pong: self.heartbeat.evict_on_missed_pong,
            send_timeout: self.send_timeout(),
        }
    }

    /// Per-connection send timeout.
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.send_timeout_ms)
    }

    /// Largest accepted `POST /publish` body: the media limit after base64
    /// expansion plus the JSON envelope.
    #[must_use]
    pub fn publish_body_limit(&self) -> usize {
        self.limits
            .max_media_bytes
            .div_ceil(3)
            .saturating_mul(4)
            .saturating_add(PUBLISH_ENVELOPE_BYTES)
    }
}
