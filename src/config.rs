//! Engine configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding [`EngineConfig::api_url`].
pub const API_URL_ENV: &str = "ROOMSYNC_API_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Configuration for the HTTP client and the reconciliation channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// URL of the capability manifest. Relative links resolve against it.
    pub api_url: String,
    /// Fixed delay before every reconnect attempt.
    pub reconnect_backoff_ms: u64,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Reload the whole location after the push channel re-joins.
    pub reload_on_reconnect: bool,
    /// Buffer size of the channel event broadcast.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api/spec".to_string(),
            reconnect_backoff_ms: 500,
            request_timeout_secs: 30,
            user_agent: format!("roomsync/{}", env!("CARGO_PKG_VERSION")),
            reload_on_reconnect: true,
            event_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; absent fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Apply environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_url = url;
            }
        }
        self
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.reconnect_backoff(), Duration::from_millis(500));
        assert!(config.reload_on_reconnect);
        assert!(config.user_agent.starts_with("roomsync/"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "api_url": "https://rooms.example.org/api/spec", "reconnect_backoff_ms": 250 }}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.api_url, "https://rooms.example.org/api/spec");
        assert_eq!(config.reconnect_backoff(), Duration::from_millis(250));
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            EngineConfig::from_file(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            EngineConfig::from_file("/nonexistent/roomsync.json"),
            Err(ConfigError::IoError(_))
        ));
    }
}
