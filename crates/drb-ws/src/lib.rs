//! Resilient WebSocket client for the Deribit session.
//!
//! Provides:
//! - Authenticated connection with optimistic `Ready` after the auth frame
//! - Automatic reconnection with capped exponential backoff and a give-up bound
//! - Subscription registry resent on every reconnect
//! - Request/response correlation and message classification
//! - Server heartbeats with liveness timeout

pub mod backoff;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod pending;
pub mod router;
pub mod subscription;
pub mod ws_write_handle;

pub use backoff::BackoffPolicy;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatMonitor;
pub use message::{WsMessage, WsRequest};
pub use pending::{PendingRequests, PendingResponse, RequestKind};
pub use router::{classify_channel, classify_response, MessageRouter, Route, RouteOutcome};
pub use subscription::SubscriptionRegistry;
pub use ws_write_handle::{WsOutbound, WsWriteHandle};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
