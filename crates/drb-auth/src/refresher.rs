//! Token refresher.
//!
//! Serves valid tokens to both transports. Readers holding a fresh token
//! never wait; a caller that finds the token stale takes the refresh guard,
//! re-checks, and only then talks to the auth endpoint.
//!
//! # Retry behavior
//! Up to `max_refresh_retries` attempts with a fixed delay between
//! consecutive failures. The guard is held across the whole sequence, so a
//! second caller waits and then re-reads the replaced token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drb_core::RpcRequest;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{AuthError, AuthResult, TransportError};
use crate::http::{HttpRequest, HttpTransport, RpcFailure};
use crate::store::TokenStore;
use crate::token::{AuthGrantResult, Credential, Token};

const AUTH_METHOD: &str = "public/auth";

/// Refresher configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Full URL of the `public/auth` endpoint.
    pub auth_url: String,
    /// Requested scope for the credential grant.
    pub scope: Option<String>,
    /// Refresh this long before expiry.
    pub refresh_skew: Duration,
    pub max_refresh_retries: u32,
    /// Delay between consecutive failed attempts.
    pub retry_delay: Duration,
}

impl AuthConfig {
    /// Defaults against a REST base URL such as `https://test.deribit.com/api/v2`.
    pub fn new(rest_url: &str) -> Self {
        Self {
            auth_url: format!("{}/{AUTH_METHOD}", rest_url.trim_end_matches('/')),
            scope: None,
            refresh_skew: Duration::from_secs(60),
            max_refresh_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Which grant an attempt uses.
enum Grant {
    ClientCredentials,
    RefreshToken(String),
}

impl Grant {
    fn name(&self) -> &'static str {
        match self {
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken(_) => "refresh_token",
        }
    }
}

/// Owns the token store and serializes refreshes.
pub struct TokenRefresher {
    store: TokenStore,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    refresh_guard: TokioMutex<()>,
    next_id: AtomicU64,
}

impl TokenRefresher {
    pub fn new(
        credential: Credential,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        Self {
            store: TokenStore::new(credential),
            transport,
            clock,
            config,
            refresh_guard: TokioMutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn credential(&self) -> &Credential {
        self.store.credential()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn skew(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.refresh_skew).unwrap_or(chrono::Duration::zero())
    }

    /// Return a token valid beyond the refresh skew.
    ///
    /// Performs initial authentication when no token exists yet, and a refresh
    /// when the current one is inside the skew window.
    pub async fn get_valid_token(&self) -> AuthResult<Token> {
        if let Some(token) = self.store.fresh(self.clock.now(), self.skew()) {
            return Ok(token);
        }

        let _guard = self.refresh_guard.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(token) = self.store.fresh(self.clock.now(), self.skew()) {
            debug!("Token refreshed by concurrent caller");
            return Ok(token);
        }

        self.refresh_locked().await
    }

    /// Refresh now regardless of expiry. Returns true on success.
    pub async fn force_refresh(&self) -> bool {
        let _guard = self.refresh_guard.lock().await;
        match self.refresh_locked().await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Forced token refresh failed");
                false
            }
        }
    }

    /// Access token for the HTTP order path.
    ///
    /// Falls back to the stale token when every refresh attempt failed.
    pub async fn access_token_best_effort(&self) -> AuthResult<String> {
        match self.get_valid_token().await {
            Ok(token) => Ok(token.access_token),
            Err(AuthError::RefreshExhausted {
                attempts,
                last_error,
                stale: Some(stale),
            }) => {
                warn!(
                    attempts,
                    last_error = %last_error,
                    expires_at = %stale.expires_at,
                    "Refresh exhausted, using stale access token"
                );
                Ok(stale.access_token)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the retry sequence. Caller must hold `refresh_guard`.
    async fn refresh_locked(&self) -> AuthResult<Token> {
        let max_attempts = self.config.max_refresh_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let grant = match self.store.snapshot() {
                Some(token) => Grant::RefreshToken(token.refresh_token),
                None => Grant::ClientCredentials,
            };
            let grant_name = grant.name();

            match self.request_token(grant).await {
                Ok(token) => {
                    info!(
                        attempt,
                        grant = grant_name,
                        expires_at = %token.expires_at,
                        "Access token obtained"
                    );
                    self.store.replace(token.clone());
                    return Ok(token);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts,
                        grant = grant_name,
                        error = %e,
                        "Token request failed"
                    );
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        let stale = self.store.snapshot();
        error!(
            attempts = max_attempts,
            last_error = %last_error,
            has_stale = stale.is_some(),
            "Token refresh exhausted"
        );
        Err(AuthError::RefreshExhausted {
            attempts: max_attempts,
            last_error,
            stale,
        })
    }

    /// One `public/auth` call.
    async fn request_token(&self, grant: Grant) -> AuthResult<Token> {
        let params = match &grant {
            Grant::ClientCredentials => self
                .store
                .credential()
                .grant_params(self.config.scope.as_deref()),
            Grant::RefreshToken(refresh_token) => serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
            }),
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest::new(id, AUTH_METHOD, params).to_value()?;

        let issued_at = self.clock.now();
        let response = self
            .transport
            .post(HttpRequest {
                url: self.config.auth_url.clone(),
                bearer: None,
                body,
            })
            .await?;

        let result = response.rpc_result().map_err(|failure| match failure {
            RpcFailure::Status { status, body } => {
                AuthError::Transport(TransportError::Status { status, body })
            }
            RpcFailure::Malformed(msg) => AuthError::Protocol(msg),
            RpcFailure::Exchange(payload) => AuthError::Exchange(payload),
        })?;

        let grant: AuthGrantResult = serde_json::from_value(result)
            .map_err(|e| AuthError::Protocol(format!("unexpected auth result: {e}")))?;

        Ok(Token::from_grant(grant, issued_at))
    }
}
