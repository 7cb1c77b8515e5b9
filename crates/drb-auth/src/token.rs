//! Credential and token values.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// API key pair. Immutable for the process lifetime.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    client_id: String,
    client_secret: String,
}

impl Credential {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// `public/auth` params for the client_credentials grant.
    pub fn grant_params(&self, scope: Option<&str>) -> serde_json::Value {
        let mut params = serde_json::json!({
            "grant_type": "client_credentials",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
        });
        if let Some(scope) = scope {
            params["scope"] = serde_json::Value::String(scope.to_string());
        }
        params
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Access token. Replaced as a whole, never patched.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
}

impl Token {
    /// True while `now` is before `expires_at - skew`.
    pub fn is_fresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now < self.expires_at - skew
    }

    /// Build from a `public/auth` result issued at `issued_at`.
    pub(crate) fn from_grant(grant: AuthGrantResult, issued_at: DateTime<Utc>) -> Self {
        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: issued_at + Duration::seconds(grant.expires_in),
            scope: grant.scope,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// `result` member of a `public/auth` response.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthGrantResult {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}
