//! # tradex-ws
//!
//! Client core for the TradeX real-time event stream: a WebSocket client
//! that connects, authenticates through query parameters, keeps the
//! connection alive and routes `order` / `trade` events to callbacks.
//!
//! ## Features
//!
//! - **Own RFC 6455 codec**: masked client frames, fragmentation, control frames
//! - **Lock-free state**: atomic connection state and counters
//! - **Serialized writes**: one writer task per connection owns the socket's write half
//! - **Isolated callbacks**: every message is handled on its own blocking task
//!   inside a panic boundary
//! - **Bounded reconnection**: exponential backoff with a cap and an attempt limit

pub mod core;
pub mod protocol;

// Re-export core client functionality
pub use core::{
    client::{ClientEvent, Metrics, TradexWsClient},
    config::ClientConfig,
    connection_state::ConnectionState,
};

pub use protocol::{
    dispatcher::{Dispatcher, EventHandler},
    error::{FrameError, TradexWsError},
    event::{Event, OrderEvent, RawEvent, TradeEvent, ORDER_EVENT, TRADE_EVENT},
    reconnect::ReconnectPolicy,
};

/// Type alias for Result with TradexWsError
pub type Result<T> = std::result::Result<T, TradexWsError>;
