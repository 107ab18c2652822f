//! CLI utilities for binaries
//!
//! Resolves the configuration file path from the environment.

use std::path::PathBuf;

/// Type of configuration to load
#[derive(Debug, Clone)]
pub enum ConfigType {
    /// Stream client configuration (config/tradex.yaml)
    Client,
    /// Custom path
    Custom(String),
}

impl ConfigType {
    /// Get the default path for this config type
    pub fn default_path(&self) -> &str {
        match self {
            ConfigType::Client => "config/tradex.yaml",
            ConfigType::Custom(path) => path,
        }
    }

    /// Get the environment variable name for this config type
    pub fn env_var_name(&self) -> &str {
        match self {
            ConfigType::Client => "TRADEX_CONFIG_PATH",
            ConfigType::Custom(_) => "TRADEX_CONFIG_PATH",
        }
    }
}

/// Load configuration path from environment or use default
///
/// An explicit [`ConfigType::Custom`] path always wins over the environment.
///
/// # Examples
/// ```
/// use tradex_client::bin_common::{load_config_from_env, ConfigType};
///
/// let path = load_config_from_env(ConfigType::Client);
/// ```
pub fn load_config_from_env(config_type: ConfigType) -> PathBuf {
    match config_type {
        ConfigType::Custom(path) => path.into(),
        ConfigType::Client => std::env::var(config_type.env_var_name())
            .unwrap_or_else(|_| config_type.default_path().to_string())
            .into(),
    }
}

/// Parse command line arguments for a binary
///
/// Returns a vector of arguments (excluding the program name)
pub fn parse_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}
