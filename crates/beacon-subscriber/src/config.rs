//! Subscriber configuration.
//!
//! Layered with the `config` crate: an optional `beacon-subscriber.toml`
//! (or the file given on the command line), then `BEACON_SUBSCRIBER_*`
//! environment variables.

use config::builder::{ConfigBuilder, DefaultState};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Subscriber configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No relay address configured.
    #[error("Server URL not configured (set server_url or BEACON_SUBSCRIBER_SERVER_URL)")]
    MissingServerUrl,

    /// The relay address is not a WebSocket URL.
    #[error("Invalid server URL '{0}': expected ws:// or wss://")]
    InvalidServerUrl(String),

    /// A timing setting is out of range.
    #[error("Invalid {field}: {reason}")]
    Invalid {
        /// Offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A layer could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Subscriber configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberConfig {
    /// Relay address, e.g. `ws://127.0.0.1:3001`.
    #[serde(default)]
    pub server_url: String,

    /// Identity announced with `auth` after every connect.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Display duration when a notification carries none.
    #[serde(default = "default_duration_ms")]
    pub default_duration_ms: u64,

    /// Fixed delay before each reconnect attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Dial timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_duration_ms() -> u64 {
    5_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl SubscriberConfig {
    /// Create a configuration for `server_url` with default timings.
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            user_id: None,
            default_duration_ms: default_duration_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    /// Set the announced identity.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Load and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a layer fails to parse or the result is invalid.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_settings(Self::layers(file).build()?)
    }

    /// The file and environment layers, for callers that add overrides.
    ///
    /// `file` replaces the default `beacon-subscriber` lookup; it is required
    /// when given.
    #[must_use]
    pub fn layers(file: Option<&Path>) -> ConfigBuilder<DefaultState> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("beacon-subscriber").required(false),
        };

        config::Config::builder()
            .add_source(file_source)
            .add_source(config::Environment::with_prefix("BEACON_SUBSCRIBER"))
    }

    /// Deserialize and validate already-layered settings.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the result is invalid.
    pub fn from_settings(settings: config::Config) -> Result<Self, ConfigError> {
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the required settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is missing or not a WebSocket URL,
    /// or if the dial timeout or reconnect delay is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.server_url.trim();
        if url.is_empty() {
            return Err(ConfigError::MissingServerUrl);
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidServerUrl(url.to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "connect_timeout_ms",
                reason: "must be greater than zero",
            });
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "reconnect_delay_ms",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    /// Identity to announce, if any. Blank identities are treated as unset.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Display duration for notifications without one.
    #[must_use]
    pub fn default_duration(&self) -> Duration {
        Duration::from_millis(self.default_duration_ms)
    }

    /// Delay before a reconnect attempt.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Dial timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn from_toml(toml: &str) -> Result<SubscriberConfig, ConfigError> {
        let settings = config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        SubscriberConfig::from_settings(settings)
    }

    #[test]
    fn test_defaults_applied() {
        let config = from_toml(r#"server_url = "ws://127.0.0.1:3001""#).unwrap();

        assert_eq!(config.default_duration(), Duration::from_secs(5));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.identity(), None);
    }

    #[test]
    fn test_full_file() {
        let config = from_toml(
            r#"
            server_url = "wss://relay.example.com"
            user_id = "alice"
            default_duration_ms = 3000
            reconnect_delay_ms = 1000
        "#,
        )
        .unwrap();

        assert_eq!(config.identity(), Some("alice"));
        assert_eq!(config.default_duration(), Duration::from_secs(3));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_server_url_is_fatal() {
        assert!(matches!(
            from_toml(r#"user_id = "alice""#),
            Err(ConfigError::MissingServerUrl)
        ));
    }

    #[test]
    fn test_rejects_http_url() {
        assert!(matches!(
            from_toml(r#"server_url = "http://localhost:3001""#),
            Err(ConfigError::InvalidServerUrl(_))
        ));
    }

    #[test]
    fn test_rejects_zero_timings() {
        assert!(matches!(
            from_toml(
                r#"
                server_url = "ws://localhost:3001"
                connect_timeout_ms = 0
            "#
            ),
            Err(ConfigError::Invalid { field: "connect_timeout_ms", .. })
        ));

        let mut config = SubscriberConfig::new("ws://localhost:3001");
        config.reconnect_delay_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "reconnect_delay_ms", .. })
        ));
    }

    #[test]
    fn test_override_layer_wins() {
        let settings = SubscriberConfig::layers(None)
            .add_source(File::from_str(r#"server_url = "ws://a""#, FileFormat::Toml))
            .set_override_option("server_url", Some("ws://b"))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(SubscriberConfig::from_settings(settings).unwrap().server_url, "ws://b");
    }

    #[test]
    fn test_blank_identity_is_unset() {
        let config = SubscriberConfig::new("ws://localhost").with_user_id("  ");
        assert_eq!(config.identity(), None);
    }
}
