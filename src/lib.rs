//! TradeX stream client - Main Library
//!
//! ## Architecture
//!
//! - **tradex_ws**: WebSocket client core (re-exported from workspace)
//! - **bin_common**: Common utilities for binary executables (config, logging, shutdown)
//!
//! ## Usage in Binaries
//!
//! ```rust
//! use tradex_client::bin_common::{load_config_from_env, AppConfig, ConfigType};
//! use tradex_client::tradex_ws::TradexWsClient;
//! ```

// Re-export workspace libraries for convenience
pub use tradex_ws;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;
    pub mod config;
    pub mod runner;

    pub use cli::{load_config_from_env, parse_args, ConfigType};
    pub use config::{AppConfig, ConfigError};
    pub use runner::{init_logging_with_level, print_banner, print_shutdown, ShutdownManager};
}
