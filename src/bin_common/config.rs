//! Application configuration for the stream binaries
//!
//! The YAML file carries connection tunables; the token and client id come
//! from the environment (or `.env`) and never from the file.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use tradex_ws::ClientConfig;

pub const TOKEN_ENV: &str = "TRADEX_TOKEN";
pub const CLIENT_ID_ENV: &str = "TRADEX_CLIENT_ID";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarMissing(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level YAML document
///
/// ```yaml
/// log_level: info
/// client:
///   host: ws.tradex.example
///   port: 443
///   heartbeat_interval_ms: 30000
///   reconnect:
///     max_attempts: 5
///     initial_delay_ms: 3000
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    pub client: ClientConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from YAML file and .env
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config = Self::from_yaml(&yaml_content)?;

        dotenv::dotenv().ok(); // Don't fail if .env doesn't exist

        let token = std::env::var(TOKEN_ENV)
            .map_err(|_| ConfigError::EnvVarMissing(TOKEN_ENV.to_string()))?;
        let client_id = std::env::var(CLIENT_ID_ENV)
            .map_err(|_| ConfigError::EnvVarMissing(CLIENT_ID_ENV.to_string()))?;
        config.client = config.client.with_credentials(token, client_id);

        config.validate()?;
        Ok(config)
    }

    /// Parse the YAML document without credentials
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.client
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Log configuration summary
    pub fn log(&self) {
        let client = &self.client;
        info!("Configuration loaded:");
        info!("  Endpoint: {}", client.display_url());
        info!("  Client ID: {}", client.client_id);
        info!("  Heartbeat interval: {:?}", client.heartbeat_interval);
        info!(
            "  Reconnect: {} attempts, {:?} initial, x{}, cap {:?}",
            client.reconnect.max_attempts,
            client.reconnect.initial_delay,
            client.reconnect.backoff_factor,
            client.reconnect.max_delay
        );
        info!("  Log level: {}", self.log_level);
    }
}
