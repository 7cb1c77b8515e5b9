//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Auth error: {0}")]
    Auth(#[from] drb_auth::AuthError),

    #[error("Transport error: {0}")]
    Transport(#[from] drb_auth::TransportError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] drb_ws::WsError),

    #[error("Order error: {0}")]
    Rest(#[from] drb_rest::RestError),

    #[error("Invalid input: {0}")]
    Core(#[from] drb_core::CoreError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] drb_telemetry::TelemetryError),

    #[error("Invalid session state: {0}")]
    InvalidState(drb_ws::ConnectionState),

    #[error("No response to request {id} within {limit:?}")]
    ResponseTimeout { id: u64, limit: std::time::Duration },

    #[error("Session is not running")]
    NotRunning,

    #[error("Session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type AppResult<T> = Result<T, AppError>;
