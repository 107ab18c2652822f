//! Inbound application events
//!
//! Every complete data message carries a JSON envelope:
//!
//! ```text
//! {"eventType": "<type>", "data": { ... }}
//! ```
//!
//! The envelope is decoded once per message into an [`Event`]. The `order`
//! and `trade` streams get their own variants; anything else is kept as a
//! [`RawEvent`]. Record schemas are left to the caller, so every variant
//! exposes its `data` object as a `serde_json::Value`.

use crate::protocol::error::{Result, TradexWsError};
use serde::Deserialize;
use serde_json::Value;

pub const ORDER_EVENT: &str = "order";
pub const TRADE_EVENT: &str = "trade";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "eventType")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

/// Order update pushed by the server
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub data: Value,
}

/// Trade (fill) pushed by the server
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub data: Value,
}

/// Any other event type
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub event_type: String,
    pub data: Value,
}

/// Decoded inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Order(OrderEvent),
    Trade(TradeEvent),
    Raw(RawEvent),
}

impl Event {
    /// Decode a message payload into an event
    ///
    /// Fails on malformed JSON or a missing/non-string `eventType`.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| TradexWsError::Decode(e.to_string()))?;

        Ok(match envelope.event_type.as_str() {
            ORDER_EVENT => Event::Order(OrderEvent {
                data: envelope.data,
            }),
            TRADE_EVENT => Event::Trade(TradeEvent {
                data: envelope.data,
            }),
            _ => Event::Raw(RawEvent {
                event_type: envelope.event_type,
                data: envelope.data,
            }),
        })
    }

    /// The `eventType` string this event was routed by
    pub fn event_type(&self) -> &str {
        match self {
            Event::Order(_) => ORDER_EVENT,
            Event::Trade(_) => TRADE_EVENT,
            Event::Raw(raw) => &raw.event_type,
        }
    }

    /// The `data` object of the envelope
    pub fn data(&self) -> &Value {
        match self {
            Event::Order(e) => &e.data,
            Event::Trade(e) => &e.data,
            Event::Raw(e) => &e.data,
        }
    }

    pub fn into_data(self) -> Value {
        match self {
            Event::Order(e) => e.data,
            Event::Trade(e) => e.data,
            Event::Raw(e) => e.data,
        }
    }
}
