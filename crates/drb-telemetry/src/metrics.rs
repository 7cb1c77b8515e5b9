//! Prometheus metrics for the session client.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, which is a startup bug. These panics only happen during static
//! initialization, never at runtime.

use std::time::Duration;

use drb_core::Category;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge_vec, Encoder, Histogram, HistogramVec,
    IntCounter, IntCounterVec, IntGaugeVec, TextEncoder,
};

use crate::error::TelemetryResult;

/// Connection state names, matching `ConnectionState::as_str`.
pub const WS_STATES: [&str; 6] = [
    "disconnected",
    "connecting",
    "authenticating",
    "ready",
    "reconnecting",
    "given_up",
];

/// Label values used for latency reports from the streaming path.
pub const LATENCY_FRAME: &str = "frame";
pub const LATENCY_WS_SEND: &str = "ws_send";

/// Connection state machine (1 = active, 0 = inactive).
pub static WS_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "drb_ws_state",
        "WebSocket state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Transitions into `reconnecting`.
pub static WS_RECONNECT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "drb_ws_reconnect_total",
        "Total WebSocket reconnection attempts"
    )
    .unwrap()
});

/// Inbound messages delivered to sinks.
pub static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "drb_messages_total",
        "Inbound messages delivered, by category",
        &["category"]
    )
    .unwrap()
});

/// Messages a sink could not accept.
pub static SINK_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "drb_sink_dropped_total",
        "Messages dropped because the sink channel was full or closed",
        &["category"]
    )
    .unwrap()
});

/// Time to classify and deliver one inbound frame.
pub static FRAME_LATENCY_US: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "drb_frame_latency_us",
        "Inbound frame processing latency in microseconds",
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Time to write one outbound frame.
pub static WS_SEND_LATENCY_US: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "drb_ws_send_latency_us",
        "Outbound frame write latency in microseconds",
        vec![5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// Order call round trip.
pub static ORDER_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "drb_order_latency_ms",
        "Order call round-trip latency in milliseconds",
        &["method"],
        vec![5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Only the active state is set to 1.
    pub fn ws_state_set(state: &str) {
        for s in WS_STATES {
            WS_STATE.with_label_values(&[s]).set(0);
        }
        WS_STATE.with_label_values(&[state]).set(1);
    }

    pub fn ws_reconnect() {
        WS_RECONNECT_TOTAL.inc();
    }

    pub fn message_delivered(category: Category) {
        MESSAGES_TOTAL
            .with_label_values(&[category.as_str()])
            .inc();
    }

    pub fn sink_dropped(category: Category) {
        SINK_DROPPED_TOTAL
            .with_label_values(&[category.as_str()])
            .inc();
    }

    /// Record a latency report.
    ///
    /// `frame` and `ws_send` come from the streaming path; any other label
    /// is the JSON-RPC method of an order call.
    pub fn latency(label: &str, elapsed: Duration) {
        match label {
            LATENCY_FRAME => FRAME_LATENCY_US.observe(elapsed.as_secs_f64() * 1e6),
            LATENCY_WS_SEND => WS_SEND_LATENCY_US.observe(elapsed.as_secs_f64() * 1e6),
            method => ORDER_LATENCY_MS
                .with_label_values(&[method])
                .observe(elapsed.as_secs_f64() * 1e3),
        }
    }
}

/// Text exposition of every registered metric.
pub fn render() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}
