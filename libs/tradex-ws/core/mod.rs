//! # Connection core
//!
//! Socket-owning side of the client: transport, handshake, per-epoch tasks
//! and the lifecycle state machine.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tradex_ws::{ClientConfig, Event, ReconnectPolicy, TradexWsClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ClientConfig::new("ws.tradex.example", 443)
//!         .with_credentials(token, client_id)
//!         .with_reconnect(ReconnectPolicy::default());
//!
//!     let client = TradexWsClient::new(config);
//!     client.register_callback("order", |event: Event| {
//!         println!("order: {}", event.data());
//!         Ok(())
//!     });
//!
//!     if !client.start().await {
//!         return;
//!     }
//!
//!     while let Ok(event) = client.recv_event() {
//!         println!("Event: {:?}", event);
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub(crate) mod connection;
pub mod connection_state;
pub mod handshake;
pub(crate) mod heartbeat;
pub mod pong_tracker;
pub(crate) mod receiver;
pub mod transport;

// Re-export main types
pub use client::{ClientEvent, Metrics, TradexWsClient};
pub use config::ClientConfig;
pub use connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
pub use pong_tracker::PongTracker;
