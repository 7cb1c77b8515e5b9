//! WebSocket error types.

use drb_core::RpcErrorPayload;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Exchange error: {0}")]
    Exchange(RpcErrorPayload),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Gave up after {attempts} reconnect attempts")]
    GivenUp { attempts: u32 },

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Closed-connection error for requests dropped on reconnect.
    pub(crate) fn abandoned() -> Self {
        Self::ConnectionClosed {
            code: 1006,
            reason: "request abandoned by reconnect".to_string(),
        }
    }
}

impl From<drb_core::CoreError> for WsError {
    fn from(e: drb_core::CoreError) -> Self {
        Self::Protocol(e.to_string())
    }
}

pub type WsResult<T> = Result<T, WsError>;
