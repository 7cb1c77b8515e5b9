//! Event sink boundary between the transports and log/consumer outputs.

use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Classification of an inbound streaming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    OrderBook,
    MarketTrade,
    Positions,
    /// Everything else (subscribe acks, errors, unknown notifications).
    Raw,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderBook => "orderbook",
            Self::MarketTrade => "market_trade",
            Self::Positions => "positions",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One received frame after classification.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub raw: String,
    pub frame: Value,
    pub category: Category,
}

impl InboundMessage {
    pub fn new(raw: String, frame: Value, category: Category) -> Self {
        Self {
            raw,
            frame,
            category,
        }
    }

    /// Channel name, for subscription notifications.
    pub fn channel(&self) -> Option<&str> {
        self.frame
            .get("params")
            .and_then(|p| p.get("channel"))
            .and_then(Value::as_str)
    }
}

/// Consumer of classified messages, order events and latency samples.
///
/// Methods are called from the receive loop and the order path. They must
/// not block.
pub trait EventSink: Send + Sync {
    /// Deliver a classified inbound message.
    fn deliver(&self, msg: &InboundMessage);

    /// Record an order request/response event.
    fn order_event(&self, event: &str, payload: &Value);

    /// Record a latency sample.
    fn latency(&self, label: &'static str, elapsed: Duration);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn deliver(&self, _msg: &InboundMessage) {}
    fn order_event(&self, _event: &str, _payload: &Value) {}
    fn latency(&self, _label: &'static str, _elapsed: Duration) {}
}
