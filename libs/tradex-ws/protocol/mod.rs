//! # Protocol layer
//!
//! Wire-level and application-level building blocks with no socket
//! ownership:
//!
//! - **frame**: RFC 6455 frame encoding, buffered decoding, reassembly
//! - **event**: `{"eventType", "data"}` envelope decoding
//! - **dispatcher**: handler registry and isolated per-message dispatch
//! - **reconnect**: backoff policy
//! - **error**: error types

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod frame;
pub mod reconnect;

pub use dispatcher::{Dispatcher, EventHandler};
pub use error::{FrameError, Result, TradexWsError};
pub use event::{Event, OrderEvent, RawEvent, TradeEvent};
pub use frame::{Frame, FrameReader, Message, MessageAssembler, Opcode};
pub use reconnect::ReconnectPolicy;
