//! Server configuration for runstate-server
//!
//! Loads and parses runstate-server.toml. Every section has defaults so the
//! server can start without a file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::executor::RetryConfig;

pub mod security;

#[derive(Debug, Error)]
pub enum ServerConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Server identification and listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfoConfig {
    /// Server name reported by the health endpoint
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Default for ServerInfoConfig {
    fn default() -> Self {
        Self {
            name: "runstate-server".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file path
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "runstate.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Security mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityMode {
    /// No authentication required; local development only
    Open,
    /// API key based authentication
    #[default]
    SecretKey,
}

/// Security configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub mode: SecurityMode,
    /// Secret key (can be overridden by SECRET_KEY environment variable)
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// Engine behaviour: leases, dequeue batches and retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts per state chain, the original included
    pub max_attempts: u32,

    /// How long a `QUEUED` state may go unreported before it times out
    pub lease_timeout_secs: u64,

    /// Period of the retry/timeout supervisor
    pub sweep_interval_secs: u64,

    /// Upper bound on one enqueue call's batch size
    pub max_batch_size: u32,

    /// Backoff applied to retries; `max_attempts` above takes precedence
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lease_timeout_secs: 300,
            sweep_interval_secs: 10,
            max_batch_size: 100,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Retry policy used by templates that do not carry their own
    pub fn default_retry_policy(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            ..self.retry.clone()
        }
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<(), ServerConfigError> {
        if self.max_attempts == 0 {
            return Err(ServerConfigError::InvalidConfig(
                "engine.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ServerConfigError::InvalidConfig(
                "engine.max_batch_size must be at least 1".to_string(),
            ));
        }
        self.default_retry_policy()
            .validate()
            .map_err(ServerConfigError::InvalidConfig)
    }
}

/// Complete server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerInfoConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ServerConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(ServerConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ServerConfigError> {
        let config: Self = toml::from_str(content).map_err(ServerConfigError::ParseError)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Load configuration from default location or environment
    ///
    /// Searches for config in:
    /// 1. CONFIG_PATH environment variable
    /// 2. ./config/runstate-server.toml
    /// 3. ../config/runstate-server.toml (for development)
    /// 4. ./runstate-server.toml
    pub fn load() -> Result<Self, ServerConfigError> {
        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            return Self::from_file(config_path);
        }

        let paths = [
            PathBuf::from("config/runstate-server.toml"),
            PathBuf::from("../config/runstate-server.toml"),
            PathBuf::from("./runstate-server.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        Err(ServerConfigError::InvalidConfig(
            "Configuration file not found. Set CONFIG_PATH or place runstate-server.toml in config/".to_string(),
        ))
    }

    /// Apply HOST and PORT environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    /// Get database URL from configuration
    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.database.path)
    }

    /// Listener address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::BackoffStrategy;

    #[test]
    fn test_config_parsing() {
        let toml_content = r#"
[server]
name = "ledger-a"
port = 9090

[database]
path = "runs.db"

[security]
mode = "secret-key"
secret_key = "k"

[engine]
max_attempts = 5
lease_timeout_secs = 30

[engine.retry]
strategy = "linear"
initial_backoff_ms = 200
"#;

        let config = ServerConfig::from_toml(toml_content).unwrap();
        assert_eq!(config.server.name, "ledger-a");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.path, "runs.db");
        assert_eq!(config.database_url(), "sqlite://runs.db");
        assert_eq!(config.security.mode, SecurityMode::SecretKey);
        assert_eq!(config.engine.max_attempts, 5);
        assert_eq!(config.engine.lease_timeout(), Duration::from_secs(30));
        assert_eq!(config.engine.sweep_interval_secs, 10);

        let policy = config.engine.default_retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.strategy, BackoffStrategy::Linear);
        assert_eq!(policy.initial_backoff_ms, 200);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.security.mode, SecurityMode::SecretKey);
        assert!(config.security.secret_key.is_none());
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_open_mode_is_opt_in() {
        let config = ServerConfig::from_toml("[security]\nmode = \"open\"\n").unwrap();
        assert_eq!(config.security.mode, SecurityMode::Open);
    }

    #[test]
    fn test_invalid_engine_rejected() {
        let err = ServerConfig::from_toml("[engine]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ServerConfigError::InvalidConfig(_)));
    }
}
