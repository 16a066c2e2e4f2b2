//! Runtime configuration for a [`crate::SyncContext`]

use crate::authority::DEFAULT_CACHE_TIMEOUT_MS;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the connection this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Server,
    #[default]
    Client,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Server => write!(f, "server"),
            Environment::Client => write!(f, "client"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub environment: Environment,
    /// Written into `senderId` of every outgoing message
    pub sender_id: String,
    /// Local client id used by authority rules when none is passed
    pub client_id: Option<String>,
    pub authority_cache_timeout_ms: u64,
    pub install_default_rules: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Client,
            sender_id: "local".to_string(),
            client_id: None,
            authority_cache_timeout_ms: DEFAULT_CACHE_TIMEOUT_MS,
            install_default_rules: true,
        }
    }
}

impl SyncConfig {
    /// Settings for the authoritative host, sending as `server`
    pub fn server() -> Self {
        Self {
            environment: Environment::Server,
            sender_id: "server".to_string(),
            ..Default::default()
        }
    }

    /// Settings for a client.
    ///
    /// The sender id is derived from `client_id` as `client-<id>`.
    pub fn client(client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        Self {
            environment: Environment::Client,
            sender_id: format!("client-{}", client_id),
            client_id: Some(client_id),
            ..Default::default()
        }
    }

    /// Parses a JSON document; missing keys take their defaults
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.environment, Environment::Client);
        assert_eq!(config.authority_cache_timeout_ms, 5_000);
        assert!(config.install_default_rules);
        assert!(config.client_id.is_none());
    }

    #[test]
    fn test_client_preset() {
        let config = SyncConfig::client("42");
        assert_eq!(config.client_id.as_deref(), Some("42"));
        assert_eq!(config.sender_id, "client-42");
    }

    #[test]
    fn test_partial_json() {
        let config =
            SyncConfig::from_json_str(r#"{"environment": "server", "authority_cache_timeout_ms": 250}"#)
                .unwrap();
        assert_eq!(config.environment, Environment::Server);
        assert_eq!(config.authority_cache_timeout_ms, 250);
        assert_eq!(config.sender_id, "local");
    }

    #[test]
    fn test_invalid_json() {
        assert!(SyncConfig::from_json_str(r#"{"environment": "peer"}"#).is_err());
        assert!(SyncConfig::from_json_str("not json").is_err());
    }
}
