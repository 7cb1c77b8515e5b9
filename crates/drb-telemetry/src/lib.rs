//! Observability for the Deribit session client.
//!
//! - Prometheus metrics for connection state, inbound traffic and latency
//! - Structured logging with tracing
//! - `EventSink` implementations writing to tracing targets or a channel

pub mod error;
pub mod logging;
pub mod metrics;
pub mod sinks;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use sinks::{ChannelSink, TracingSink};
