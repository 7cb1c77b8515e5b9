//! Auth error types.

use crate::token::Token;
use drb_core::RpcErrorPayload;
use thiserror::Error;

/// HTTP transport failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP client build failed: {0}")]
    Build(String),

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("HTTP request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Exchange error: {0}")]
    Exchange(RpcErrorPayload),

    /// Every attempt failed. `stale` is the last token held, if any.
    #[error("Token refresh exhausted after {attempts} attempts: {last_error}")]
    RefreshExhausted {
        attempts: u32,
        last_error: String,
        stale: Option<Token>,
    },
}

impl AuthError {
    /// Stale token carried by an exhausted refresh.
    pub fn stale_token(&self) -> Option<&Token> {
        match self {
            Self::RefreshExhausted { stale, .. } => stale.as_ref(),
            _ => None,
        }
    }
}

impl From<drb_core::CoreError> for AuthError {
    fn from(e: drb_core::CoreError) -> Self {
        Self::Protocol(e.to_string())
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
