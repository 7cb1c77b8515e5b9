//! Token store: the single source of truth for the access token.

use crate::token::{Credential, Token};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Holds the credential and the current token.
///
/// Reads take a short read lock and clone. The token is only ever replaced
/// whole.
#[derive(Debug)]
pub struct TokenStore {
    credential: Credential,
    token: RwLock<Option<Token>>,
}

impl TokenStore {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            token: RwLock::new(None),
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Current token, fresh or not.
    pub fn snapshot(&self) -> Option<Token> {
        self.token.read().clone()
    }

    /// Current token if still valid at `now` with margin `skew`.
    pub fn fresh(&self, now: DateTime<Utc>, skew: Duration) -> Option<Token> {
        self.token
            .read()
            .as_ref()
            .filter(|t| t.is_fresh(now, skew))
            .cloned()
    }

    /// Atomically replace the token.
    pub fn replace(&self, token: Token) {
        *self.token.write() = Some(token);
    }

    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_at: DateTime<Utc>, tag: &str) -> Token {
        Token {
            access_token: format!("acc-{tag}"),
            refresh_token: format!("ref-{tag}"),
            expires_at,
            scope: None,
        }
    }

    #[test]
    fn test_replace_and_fresh() {
        let store = TokenStore::new(Credential::new("id", "secret"));
        let now = Utc::now();
        assert!(store.snapshot().is_none());

        store.replace(token(now + Duration::seconds(120), "a"));
        assert!(store.fresh(now, Duration::seconds(60)).is_some());
        assert!(store.fresh(now + Duration::seconds(61), Duration::seconds(60)).is_none());
        // Stale token stays readable through snapshot.
        assert_eq!(store.snapshot().unwrap().access_token, "acc-a");

        store.replace(token(now + Duration::seconds(900), "b"));
        assert_eq!(store.snapshot().unwrap().refresh_token, "ref-b");

        store.clear();
        assert!(store.snapshot().is_none());
    }
}
