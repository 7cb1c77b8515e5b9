//! Session: one token refresher, one streaming connection, one order client.
//!
//! The connection runs in its own task. A second task follows state
//! transitions and publishes them as metrics.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use drb_auth::{Clock, Credential, HttpTransport, ReqwestTransport, SystemClock, Token, TokenRefresher};
use drb_core::{Channel, EventSink};
use drb_rest::RestClient;
use drb_telemetry::Metrics;
use drb_ws::{ConnectionManager, ConnectionState, PendingResponse, WsResult};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

struct SessionTasks {
    connection: JoinHandle<WsResult<()>>,
    monitor: JoinHandle<()>,
}

/// Authenticated session with the exchange.
pub struct Session {
    auth: Arc<TokenRefresher>,
    connection: Arc<ConnectionManager>,
    rest: RestClient,
    tasks: Mutex<Option<SessionTasks>>,
}

impl Session {
    /// Session over HTTPS with the system clock.
    pub fn new(
        config: &AppConfig,
        credential: Credential,
        sink: Arc<dyn EventSink>,
    ) -> AppResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.auth.request_timeout())?);
        Ok(Self::with_transport(
            config,
            credential,
            transport,
            Arc::new(SystemClock),
            sink,
        ))
    }

    pub fn with_transport(
        config: &AppConfig,
        credential: Credential,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let auth = Arc::new(TokenRefresher::new(
            credential,
            transport.clone(),
            clock,
            config.auth_config(),
        ));
        let connection = Arc::new(ConnectionManager::new(
            config.connection_config(),
            auth.clone(),
            sink.clone(),
        ));
        let rest = RestClient::new(config.rest_url.clone(), transport, auth.clone(), sink);
        Self {
            auth,
            connection,
            rest,
            tasks: Mutex::new(None),
        }
    }

    /// A token valid beyond the refresh skew.
    pub async fn get_token(&self) -> AppResult<Token> {
        Ok(self.auth.get_valid_token().await?)
    }

    pub fn auth(&self) -> &Arc<TokenRefresher> {
        &self.auth
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    pub fn is_running(&self) -> bool {
        self.tasks
            .lock()
            .as_ref()
            .is_some_and(|t| !t.connection.is_finished())
    }

    /// Register channels; returns the newly added ones.
    pub async fn ensure_subscribed<I, S>(&self, channels: I) -> AppResult<BTreeSet<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.connection.ensure_subscribed(channels).await?)
    }

    /// Subscribe `book.<instrument>.raw` for each instrument.
    pub async fn subscribe_order_book<S: AsRef<str>>(
        &self,
        instruments: &[S],
    ) -> AppResult<BTreeSet<String>> {
        for instrument in instruments {
            Channel::validate_instrument(instrument.as_ref())?;
        }
        self.ensure_subscribed(Channel::order_books(instruments)).await
    }

    /// Subscribe `ticker.<instrument>.raw` for each instrument.
    pub async fn subscribe_tickers<S: AsRef<str>>(
        &self,
        instruments: &[S],
    ) -> AppResult<BTreeSet<String>> {
        for instrument in instruments {
            Channel::validate_instrument(instrument.as_ref())?;
        }
        self.ensure_subscribed(Channel::tickers(instruments)).await
    }

    /// Positions over the stream. The response also reaches the sink.
    pub async fn request_positions(
        &self,
        currency: &str,
        kind: Option<&str>,
    ) -> AppResult<PendingResponse> {
        Ok(self.connection.request_positions(currency, kind).await?)
    }

    /// Spawn the connection and state monitor tasks.
    ///
    /// A stopped session is reinitialized first. Returns false if the
    /// session is already running, still stopping, or has given up (use
    /// `restart()` for that).
    pub fn start(&self) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks.as_ref().is_some_and(|t| !t.connection.is_finished()) {
            warn!("Session already running");
            return false;
        }
        if self.connection.is_shutdown() && !self.connection.restart() {
            warn!(state = %self.connection.state(), "Session still stopping, not started");
            return false;
        }
        if self.connection.state() == ConnectionState::GivenUp {
            warn!("Connection gave up, restart() required");
            return false;
        }
        if let Some(old) = tasks.take() {
            old.monitor.abort();
        }

        let monitor = tokio::spawn(monitor_state(self.connection.subscribe_state()));
        let connection = self.connection.clone();
        let handle = tokio::spawn(async move { connection.run().await });

        *tasks = Some(SessionTasks {
            connection: handle,
            monitor,
        });
        info!("Session started");
        true
    }

    /// Stop the connection and wait for its task. Idempotent.
    pub async fn stop(&self) -> AppResult<()> {
        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else {
            debug!("Session not running, nothing to stop");
            return Ok(());
        };
        self.connection.shutdown();

        let result = tasks.connection.await;
        tasks.monitor.abort();
        Metrics::ws_state_set(self.connection.state().as_str());

        match result? {
            Ok(()) => info!("Session stopped"),
            Err(e) => warn!(error = %e, "Connection task ended with error"),
        }
        Ok(())
    }

    /// Resume after `GivenUp` or `stop()`.
    ///
    /// Fails with `InvalidState` while the connection is still running.
    pub async fn restart(&self) -> AppResult<()> {
        if !self.connection.restart() {
            return Err(AppError::InvalidState(self.connection.state()));
        }
        let old = self.tasks.lock().take();
        if let Some(old) = old {
            old.monitor.abort();
            if let Err(e) = old.connection.await? {
                debug!(error = %e, "Previous connection task result");
            }
        }
        if !self.start() {
            return Err(AppError::InvalidState(self.connection.state()));
        }
        Ok(())
    }

    /// Wait until `pred` holds for the connection state.
    pub async fn wait_for_state<F>(&self, pred: F) -> AppResult<ConnectionState>
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        let mut rx = self.connection.subscribe_state();
        let state = rx.wait_for(pred).await.map_err(|_| AppError::NotRunning)?;
        Ok(*state)
    }
}

/// Await a streaming response for at most `limit`.
pub async fn await_response(pending: PendingResponse, limit: Duration) -> AppResult<Value> {
    let id = pending.id();
    match tokio::time::timeout(limit, pending).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(AppError::ResponseTimeout { id, limit }),
    }
}

async fn monitor_state(mut rx: watch::Receiver<ConnectionState>) {
    Metrics::ws_state_set(rx.borrow_and_update().as_str());
    while rx.changed().await.is_ok() {
        let state = *rx.borrow_and_update();
        Metrics::ws_state_set(state.as_str());
        if state == ConnectionState::Reconnecting {
            Metrics::ws_reconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drb_auth::{ManualClock, ScriptedTransport};
    use drb_core::{NullSink, RpcResponse};
    use drb_ws::{PendingRequests, RequestKind, WsError};
    use serde_json::json;

    fn session(transport: Arc<ScriptedTransport>) -> Session {
        let mut config = AppConfig::default();
        config.ws_url = "ws://127.0.0.1:1".to_string();
        Session::with_transport(
            &config,
            Credential::new("id", "secret"),
            transport,
            Arc::new(ManualClock::default()),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn test_get_token_uses_credential_grant_once() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_auth_ok("acc", "ref", 900);
        let session = session(transport.clone());

        let first = session.get_token().await.unwrap();
        let second = session.get_token().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.call_count(), 1);
        assert_eq!(
            transport.requests()[0].body["params"]["grant_type"],
            "client_credentials"
        );
    }

    #[tokio::test]
    async fn test_invalid_instrument_rejected() {
        let session = session(Arc::new(ScriptedTransport::new()));
        let result = session.subscribe_order_book(&["BTC PERPETUAL"]).await;
        assert!(matches!(result, Err(AppError::Core(_))));
        assert!(session.connection().subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_before_start_only_registers() {
        let session = session(Arc::new(ScriptedTransport::new()));
        let added = session
            .subscribe_tickers(&["BTC-PERPETUAL", "ETH-PERPETUAL"])
            .await
            .unwrap();
        assert_eq!(added.len(), 2);
        assert!(session
            .connection()
            .subscriptions()
            .contains("ticker.ETH-PERPETUAL.raw"));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    fn positions_kind() -> RequestKind {
        RequestKind::Positions {
            currency: "BTC".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_response_times_out() {
        let pending = PendingRequests::new();
        let (id, response) = pending.register(positions_kind());

        let result = await_response(response, Duration::from_secs(30)).await;
        match result {
            Err(AppError::ResponseTimeout { id: got, limit }) => {
                assert_eq!(got, id);
                assert_eq!(limit, Duration::from_secs(30));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_await_response_resolves() {
        let pending = PendingRequests::new();
        let (id, response) = pending.register(positions_kind());
        let frame = json!({"jsonrpc": "2.0", "id": id, "result": [{"size": 10.0}]});
        pending.resolve(id, serde_json::from_value::<RpcResponse>(frame).unwrap());

        let value = await_response(response, Duration::from_secs(1)).await.unwrap();
        assert_eq!(value[0]["size"], 10.0);
    }

    #[tokio::test]
    async fn test_await_response_reports_lost_connection() {
        let pending = PendingRequests::new();
        let (_, response) = pending.register(positions_kind());
        pending.clear();

        let result = await_response(response, Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(AppError::WebSocket(WsError::ConnectionClosed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let session = session(Arc::new(ScriptedTransport::new()));
        session.stop().await.unwrap();
        session.stop().await.unwrap();
        assert!(!session.is_running());
    }
}
