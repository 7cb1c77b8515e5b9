//! Order client error types.

use drb_auth::{AuthError, TransportError};
use drb_core::{CoreError, RpcErrorPayload};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Well-formed rejection from the exchange. Never retried.
    #[error("Order rejected: {0}")]
    Exchange(RpcErrorPayload),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] CoreError),
}

impl RestError {
    /// Exchange error code, if the exchange rejected the call.
    pub fn exchange_code(&self) -> Option<i64> {
        match self {
            Self::Exchange(payload) => Some(payload.code),
            _ => None,
        }
    }
}

pub type RestResult<T> = Result<T, RestError>;
