//! Server configuration.
//!
//! Loaded from an optional TOML file; the CLI overrides individual fields
//! from flags and environment variables afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::ConfigError;

/// Notification server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret for `/internal/*`. Empty refuses every job report.
    pub internal_token: String,
    /// Analysis worker endpoint. Without one, uploads are logged and dropped.
    pub worker_url: Option<String>,
    /// Largest artifact accepted through chunked upload.
    pub max_upload_bytes: u64,
    /// Abandoned partial uploads are purged after this many seconds.
    pub staging_ttl_secs: u64,
    /// Per-connection outbound queue length.
    pub outbound_capacity: usize,
    /// Number of recent job outcomes kept for reconciliation.
    pub ledger_capacity: usize,
    /// Session token -> user id, issued by the external session service.
    pub sessions: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3030,
            internal_token: String::new(),
            worker_url: None,
            max_upload_bytes: batchwire_core::validation::DEFAULT_MAX_BYTES,
            staging_ttl_secs: 600,
            outbound_capacity: 64,
            ledger_capacity: 1024,
            sessions: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Read a TOML config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            port = 4000
            internal_token = "s3cret"

            [sessions]
            tok-alice = "alice"
            tok-bob = "bob"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.internal_token, "s3cret");
        assert_eq!(config.outbound_capacity, 64);
        assert_eq!(config.sessions.get("tok-bob").map(String::as_str), Some("bob"));
        assert_eq!(config.addr(), "127.0.0.1:4000");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        assert!(matches!(
            ServerConfig::from_toml_str("port = \"not a number\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
