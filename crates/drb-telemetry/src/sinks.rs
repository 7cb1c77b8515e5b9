//! `EventSink` implementations.
//!
//! `TracingSink` writes each category to its own tracing target so a
//! subscriber can send them to separate outputs. `ChannelSink` hands
//! messages to a consumer task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drb_core::{Category, EventSink, InboundMessage};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;

/// Logs every event through tracing and updates metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for TracingSink {
    fn deliver(&self, msg: &InboundMessage) {
        Metrics::message_delivered(msg.category);
        let channel = msg.channel().unwrap_or("-");
        match msg.category {
            Category::OrderBook => info!(target: "drb::orderbook", channel, payload = %msg.raw),
            Category::MarketTrade => {
                info!(target: "drb::market_trade", channel, payload = %msg.raw)
            }
            Category::Positions => info!(target: "drb::positions", payload = %msg.raw),
            Category::Raw => info!(target: "drb::raw", payload = %msg.raw),
        }
    }

    fn order_event(&self, event: &str, payload: &Value) {
        info!(target: "drb::orders", event, payload = %payload);
    }

    fn latency(&self, label: &'static str, elapsed: Duration) {
        Metrics::latency(label, elapsed);
        debug!(target: "drb::latency", label, micros = elapsed.as_micros() as u64);
    }
}

/// Forwards classified messages over a bounded channel.
///
/// A full or closed channel drops the message and counts it; the receive
/// loop never waits on the consumer. Order events and latency samples go
/// to the optional `tee` sink only.
pub struct ChannelSink {
    tx: mpsc::Sender<InboundMessage>,
    tee: Option<Arc<dyn EventSink>>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx,
                tee: None,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Also pass every event to `sink`.
    pub fn with_tee(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.tee = Some(sink);
        self
    }

    /// Messages dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, msg: &InboundMessage) {
        if let Some(tee) = &self.tee {
            tee.deliver(msg);
        }
        if let Err(e) = self.tx.try_send(msg.clone()) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            Metrics::sink_dropped(msg.category);
            // Log the first drop and then every 1000th.
            if total == 1 || total % 1000 == 0 {
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "full",
                    mpsc::error::TrySendError::Closed(_) => "closed",
                };
                warn!(category = %msg.category, reason, total, "Sink channel dropped message");
            }
        }
    }

    fn order_event(&self, event: &str, payload: &Value) {
        if let Some(tee) = &self.tee {
            tee.order_event(event, payload);
        }
    }

    fn latency(&self, label: &'static str, elapsed: Duration) {
        if let Some(tee) = &self.tee {
            tee.latency(label, elapsed);
        }
    }
}
