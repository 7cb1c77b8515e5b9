//! Application configuration.

use crate::error::{AppError, AppResult};
use drb_auth::{AuthConfig, Credential};
use drb_ws::{BackoffPolicy, ConnectionConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "DRB_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

fn default_rest_url() -> String {
    "https://test.deribit.com/api/v2".to_string()
}

fn default_ws_url() -> String {
    "wss://test.deribit.com/ws/api/v2".to_string()
}

/// Token lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Scope for the credential grant.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,
    #[serde(default = "default_max_refresh_retries")]
    pub max_refresh_retries: u32,
    /// Delay between failed refresh attempts (seconds).
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Per-request HTTP timeout (seconds).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_refresh_skew_secs() -> u64 {
    60
}

fn default_max_refresh_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            scope: None,
            refresh_skew_secs: default_refresh_skew_secs(),
            max_refresh_retries: default_max_refresh_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AuthSettings {
    pub fn auth_config(&self, rest_url: &str) -> AuthConfig {
        AuthConfig {
            scope: self.scope.clone(),
            refresh_skew: Duration::from_secs(self.refresh_skew_secs),
            max_refresh_retries: self.max_refresh_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            ..AuthConfig::new(rest_url)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// WebSocket configuration subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Consecutive failures before giving up (0 = give up on the first).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base delay for reconnection backoff (ms).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Backoff cap (ms).
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Server heartbeat interval (seconds). 0 disables heartbeats.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Wait before restarting a given-up session (seconds). 0 exits instead.
    #[serde(default = "default_restart_after_give_up_secs")]
    pub restart_after_give_up_secs: u64,
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_restart_after_give_up_secs() -> u64 {
    60
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            outbound_buffer: default_outbound_buffer(),
            restart_after_give_up_secs: default_restart_after_give_up_secs(),
        }
    }
}

impl WsConfig {
    pub fn connection_config(&self, url: &str, auth_scope: Option<String>) -> ConnectionConfig {
        ConnectionConfig {
            url: url.to_string(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.reconnect_base_delay_ms),
                Duration::from_millis(self.reconnect_max_delay_ms),
            ),
            heartbeat_interval: (self.heartbeat_interval_secs > 0)
                .then(|| Duration::from_secs(self.heartbeat_interval_secs)),
            outbound_buffer: self.outbound_buffer,
            auth_scope,
            ..ConnectionConfig::default()
        }
    }

    /// `None` when a given-up session should not be restarted.
    pub fn restart_after_give_up(&self) -> Option<Duration> {
        (self.restart_after_give_up_secs > 0)
            .then(|| Duration::from_secs(self.restart_after_give_up_secs))
    }
}

/// Channels subscribed by `run`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Instruments for `book.<instrument>.raw`.
    #[serde(default)]
    pub order_book: Vec<String>,
    /// Instruments for `ticker.<instrument>.raw`.
    #[serde(default)]
    pub ticker: Vec<String>,
    /// Request positions for this currency once connected.
    #[serde(default)]
    pub positions_currency: Option<String>,
    #[serde(default)]
    pub positions_kind: Option<String>,
}

/// Names of the environment variables holding the API credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_client_id_env")]
    pub client_id_env: String,
    #[serde(default = "default_client_secret_env")]
    pub client_secret_env: String,
}

fn default_client_id_env() -> String {
    "DERIBIT_CLIENT_ID".to_string()
}

fn default_client_secret_env() -> String {
    "DERIBIT_CLIENT_SECRET".to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            client_id_env: default_client_id_env(),
            client_secret_env: default_client_secret_env(),
        }
    }
}

impl CredentialsConfig {
    /// Read the credential from the process environment.
    pub fn load(&self) -> AppResult<Credential> {
        self.load_with(|name| std::env::var(name).ok())
    }

    /// Read the credential through `lookup`.
    pub fn load_with<F>(&self, lookup: F) -> AppResult<Credential>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppError::Config(format!("{name} is not set")))
        };
        let client_id = read(&self.client_id_env)?;
        let client_secret = read(&self.client_secret_env)?;
        Ok(Credential::new(client_id, client_secret))
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info,drb=debug".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
            auth: AuthSettings::default(),
            websocket: WsConfig::default(),
            subscriptions: SubscriptionConfig::default(),
            credentials: CredentialsConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Path: `explicit`, then `DRB_CONFIG`, then `config/default.toml`.
    /// A missing file falls back to defaults.
    pub fn load(explicit: Option<&str>) -> AppResult<Self> {
        let config_path = explicit
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        if Path::new(&config_path).exists() {
            tracing::info!(path = %config_path, "Loading configuration");
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn auth_config(&self) -> AuthConfig {
        self.auth.auth_config(&self.rest_url)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        self.websocket
            .connection_config(&self.ws_url, self.auth.scope.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.rest_url, "https://test.deribit.com/api/v2");
        assert_eq!(config.websocket.max_reconnect_attempts, 5);

        let auth = config.auth_config();
        assert_eq!(auth.auth_url, "https://test.deribit.com/api/v2/public/auth");
        assert_eq!(auth.refresh_skew, Duration::from_secs(60));
        assert_eq!(auth.max_refresh_retries, 3);
        assert_eq!(auth.retry_delay, Duration::from_secs(5));

        let ws = config.connection_config();
        assert_eq!(ws.backoff.delay(10), Duration::from_secs(30));
        assert_eq!(ws.heartbeat_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            ws_url = "ws://127.0.0.1:9000"

            [websocket]
            heartbeat_interval_secs = 0
            restart_after_give_up_secs = 0

            [subscriptions]
            order_book = ["BTC-PERPETUAL"]
            positions_currency = "BTC"
            "#,
        )
        .unwrap();

        assert_eq!(config.ws_url, "ws://127.0.0.1:9000");
        assert_eq!(config.rest_url, "https://test.deribit.com/api/v2");
        assert_eq!(config.websocket.max_reconnect_attempts, 5);
        assert_eq!(config.connection_config().heartbeat_interval, None);
        assert_eq!(config.websocket.restart_after_give_up(), None);
        assert_eq!(config.subscriptions.order_book, vec!["BTC-PERPETUAL"]);
        assert!(config.subscriptions.ticker.is_empty());
        assert_eq!(config.subscriptions.positions_currency.as_deref(), Some("BTC"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(
            AppConfig::from_toml_str("websocket = 3"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_credentials_from_lookup() {
        let env: HashMap<&str, &str> = [("MY_ID", "abc"), ("MY_SECRET", "xyz")].into();
        let creds = CredentialsConfig {
            client_id_env: "MY_ID".to_string(),
            client_secret_env: "MY_SECRET".to_string(),
        };
        let credential = creds
            .load_with(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(credential.client_id(), "abc");
        assert_eq!(credential.client_secret(), "xyz");
    }

    #[test]
    fn test_missing_credential_is_config_error() {
        let err = CredentialsConfig::default()
            .load_with(|name| (name == "DERIBIT_CLIENT_ID").then(|| "abc".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("DERIBIT_CLIENT_SECRET"));
    }
}
