//! WebSocket connection manager.
//!
//! Handles connection lifecycle, authentication, automatic reconnection with
//! capped exponential backoff, and subscription restoration after reconnect.
//!
//! ```text
//! Disconnected --run()--> Connecting --open--> Authenticating --auth sent--> Ready
//! Ready / Connecting --failure--> Reconnecting --backoff, open--> Authenticating
//! Reconnecting --attempts >= max--> GivenUp --restart()--> Disconnected
//! ```

use crate::backoff::BackoffPolicy;
use crate::error::{WsError, WsResult};
use crate::heartbeat::{HeartbeatMonitor, DEFAULT_LIVENESS_GRACE};
use crate::message::WsRequest;
use crate::pending::{PendingRequests, PendingResponse, RequestKind};
use crate::router::{MessageRouter, RouteOutcome};
use crate::subscription::SubscriptionRegistry;
use crate::ws_write_handle::{WsOutbound, WsWriteHandle};
use drb_auth::TokenRefresher;
use drb_core::EventSink;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Consecutive failed attempts before giving up. 0 gives up on the first failure.
    pub max_reconnect_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Server heartbeat interval. `None` disables heartbeats and liveness checks.
    pub heartbeat_interval: Option<Duration>,
    /// Silence allowed on top of two missed heartbeat intervals.
    pub liveness_grace: Duration,
    /// Capacity of the outbound queue.
    pub outbound_buffer: usize,
    /// Scope requested by the streaming auth frame.
    pub auth_scope: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "wss://test.deribit.com/ws/api/v2".to_string(),
            max_reconnect_attempts: 5,
            backoff: BackoffPolicy::default(),
            heartbeat_interval: Some(Duration::from_secs(30)),
            liveness_grace: DEFAULT_LIVENESS_GRACE,
            outbound_buffer: 256,
            auth_scope: None,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Reconnecting,
    /// Terminal until `restart()`.
    GivenUp,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 6] = [
        Self::Disconnected,
        Self::Connecting,
        Self::Authenticating,
        Self::Ready,
        Self::Reconnecting,
        Self::GivenUp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::GivenUp => "given_up",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    auth: Arc<TokenRefresher>,
    subscriptions: Arc<SubscriptionRegistry>,
    pending: Arc<PendingRequests>,
    router: MessageRouter,
    heartbeat: HeartbeatMonitor,
    sink: Arc<dyn EventSink>,
    state_tx: watch::Sender<ConnectionState>,
    reconnect_count: AtomicU32,
    /// Outbound message sender (for WsWriteHandle).
    outbound_tx: mpsc::Sender<WsOutbound>,
    /// Outbound message receiver (consumed by message loop).
    outbound_rx: TokioMutex<mpsc::Receiver<WsOutbound>>,
    /// Replaced on restart after a shutdown.
    shutdown_token: Mutex<CancellationToken>,
    /// Orders registry inserts against the Ready transition, so a channel is
    /// either in the resubscribe snapshot or sent by its caller, never both.
    resubscribe_gate: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        auth: Arc<TokenRefresher>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let pending = Arc::new(PendingRequests::new());
        Self {
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval, config.liveness_grace),
            router: MessageRouter::new(pending.clone(), sink.clone()),
            config,
            auth,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            pending,
            sink,
            state_tx,
            reconnect_count: AtomicU32::new(0),
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            shutdown_token: Mutex::new(CancellationToken::new()),
            resubscribe_gate: Mutex::new(()),
        }
    }

    /// Get a write handle for sending messages.
    pub fn write_handle(&self) -> WsWriteHandle {
        WsWriteHandle::new(
            self.outbound_tx.clone(),
            self.state_tx.subscribe(),
            self.pending.clone(),
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Consecutive failed attempts since the last `Ready`.
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Arc<SubscriptionRegistry> {
        self.subscriptions.clone()
    }

    /// Signal graceful shutdown. Idempotent.
    ///
    /// Ends the message loop or a pending backoff wait promptly.
    pub fn shutdown(&self) {
        let token = self.shutdown_token.lock();
        if !token.is_cancelled() {
            info!("ConnectionManager shutdown requested");
            token.cancel();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.lock().is_cancelled()
    }

    /// Reinitialize after `GivenUp` or a shutdown.
    ///
    /// Returns false if the manager is still running.
    pub fn restart(&self) -> bool {
        let state = self.state();
        let stopped = state == ConnectionState::Disconnected && self.is_shutdown();
        if state != ConnectionState::GivenUp && !stopped {
            warn!(%state, "Restart ignored, manager has not stopped");
            return false;
        }

        {
            let mut token = self.shutdown_token.lock();
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
        }
        self.reconnect_count.store(0, Ordering::SeqCst);
        self.pending.clear();
        self.set_state(ConnectionState::Disconnected);
        info!("ConnectionManager restarted");
        true
    }

    /// Register channels and subscribe to the newly added ones.
    ///
    /// Returns the newly added set. When the connection is not `Ready` the
    /// channels are only registered; they go out with the resubscribe on the
    /// next `Ready`.
    pub async fn ensure_subscribed<I, S>(&self, channels: I) -> WsResult<BTreeSet<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        // Read before the gate so nothing awaits between the Ready check and the send.
        let access_token = if self.state() == ConnectionState::Ready {
            self.access_token().await
        } else {
            None
        };
        let (added, ready) = {
            let _gate = self.resubscribe_gate.lock();
            let added = self.subscriptions.ensure_subscribed(channels);
            (added, self.state() == ConnectionState::Ready)
        };

        if added.is_empty() {
            return Ok(added);
        }
        if !ready {
            info!(channels = ?added, "Not ready, channels deferred to next resubscribe");
            return Ok(added);
        }

        let handle = self.write_handle();
        let kind = RequestKind::Subscribe {
            channels: added.clone(),
        };
        match handle
            .request(kind, |id| {
                WsRequest::subscribe(id, &added, access_token.as_deref())
            })
            .await
        {
            Ok(response) => {
                info!(id = response.id(), channels = ?added, "Subscribe request queued");
                Ok(added)
            }
            Err(WsError::NotReady(reason)) => {
                info!(channels = ?added, %reason, "Connection dropped, channels deferred to next resubscribe");
                Ok(added)
            }
            Err(e) => {
                error!(channels = ?added, error = %e, "Subscribe request failed");
                Err(e)
            }
        }
    }

    /// Request positions for `currency`. The response is also delivered to
    /// the sink as `Positions`.
    pub async fn request_positions(
        &self,
        currency: &str,
        kind: Option<&str>,
    ) -> WsResult<PendingResponse> {
        let request = RequestKind::Positions {
            currency: currency.to_string(),
        };
        let handle = self.write_handle();
        let result = match handle.check_ready() {
            Ok(()) => {
                let access_token = self.access_token().await;
                handle
                    .request(request, |id| {
                        WsRequest::get_positions(id, currency, kind, access_token.as_deref())
                    })
                    .await
            }
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            error!(currency, error = %e, "Positions request failed");
            e
        })
    }

    /// Shared access token for private streaming requests.
    ///
    /// `None` when no token can be had; the request then goes out without one.
    async fn access_token(&self) -> Option<String> {
        match self.auth.access_token_best_effort().await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "No access token for streaming request");
                None
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            info!(from = %prev, to = %next, "Connection state changed");
        }
    }

    /// Run the connection until shutdown or give-up.
    ///
    /// Returns `Ok(())` on shutdown and `Err(WsError::GivenUp)` once the
    /// reconnect budget is spent.
    pub async fn run(&self) -> WsResult<()> {
        let shutdown = self.shutdown_token.lock().clone();

        if self.state() == ConnectionState::GivenUp {
            return Err(WsError::GivenUp {
                attempts: self.reconnect_count(),
            });
        }
        self.set_state(ConnectionState::Connecting);

        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, exiting connect loop");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            match self.try_connect(&shutdown).await {
                Ok(()) => {
                    self.pending.clear();
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "WebSocket connection error");
                }
            }

            self.pending.clear();

            if shutdown.is_cancelled() {
                info!("Shutdown requested after disconnect, not reconnecting");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.set_state(ConnectionState::Reconnecting);

            let attempt = self.reconnect_count();
            if attempt >= self.config.max_reconnect_attempts {
                error!(attempts = attempt, "Max reconnection attempts reached, giving up");
                self.set_state(ConnectionState::GivenUp);
                return Err(WsError::GivenUp { attempts: attempt });
            }

            let delay = self.config.backoff.delay(attempt);
            warn!(
                attempt = attempt + 1,
                max = self.config.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }

            self.reconnect_count.store(attempt + 1, Ordering::SeqCst);
        }
    }

    /// One connection lifetime. `Ok(())` only on shutdown.
    async fn try_connect(&self, shutdown: &CancellationToken) -> WsResult<()> {
        info!(url = %self.config.url, "Connecting to WebSocket");

        // TCP_NODELAY for lower latency
        let connect = connect_async_tls_with_config(&self.config.url, None, true, None);
        let (ws_stream, _response) = tokio::select! {
            result = connect => result?,
            () = shutdown.cancelled() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        self.set_state(ConnectionState::Authenticating);
        self.drain_stale_outbound().await;

        let (auth_id, _) = self.pending.register(RequestKind::Auth);
        let auth_frame = WsRequest::auth(
            auth_id,
            self.auth.credential(),
            self.config.auth_scope.as_deref(),
        )?;
        self.send_frame(&mut write, auth_frame).await?;
        debug!(id = auth_id, "Auth frame sent");

        let access_token = tokio::select! {
            token = self.access_token() => token,
            () = shutdown.cancelled() => return Ok(()),
        };

        // Auth success is not awaited.
        let channels = {
            let _gate = self.resubscribe_gate.lock();
            self.reconnect_count.store(0, Ordering::SeqCst);
            self.set_state(ConnectionState::Ready);
            self.subscriptions.all()
        };
        info!(channels = channels.len(), "WebSocket ready");

        if !channels.is_empty() {
            let (id, _) = self.pending.register(RequestKind::Subscribe {
                channels: channels.clone(),
            });
            let frame = WsRequest::subscribe(id, &channels, access_token.as_deref())?;
            self.send_frame(&mut write, frame).await?;
            info!(id, channels = ?channels, "Subscriptions restored");
        }

        if let Some(interval) = self.heartbeat.interval() {
            let (id, _) = self.pending.register(RequestKind::SetHeartbeat);
            self.send_frame(&mut write, WsRequest::set_heartbeat(id, interval.as_secs())?)
                .await?;
            debug!(id, interval_secs = interval.as_secs(), "Heartbeat requested");
        }

        self.heartbeat.reset();

        loop {
            let outbound_recv = async { self.outbound_rx.lock().await.recv().await };

            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(error = %e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_message();
                            if self.router.route(&text) == RouteOutcome::ReplyTest {
                                let (id, _) = self.pending.register(RequestKind::Test);
                                self.send_frame(&mut write, WsRequest::test(id)?).await?;
                                debug!(id, "Answered heartbeat test_request");
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_message();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "stream ended".to_string(),
                            });
                        }
                        _ => {}
                    }
                }

                outbound = outbound_recv => {
                    match outbound {
                        Some(WsOutbound::Text(text)) => {
                            self.send_frame(&mut write, text).await?;
                        }
                        Some(WsOutbound::Request { id, payload }) => {
                            self.send_frame(&mut write, payload).await?;
                            debug!(id, "Request sent");
                        }
                        None => {}
                    }
                }

                () = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        error!(
                            silent_ms = self.heartbeat.time_since_last_message().as_millis() as u64,
                            "Heartbeat timeout"
                        );
                        return Err(WsError::HeartbeatTimeout);
                    }
                }
            }
        }
    }

    async fn send_frame(&self, write: &mut WsSink, text: String) -> WsResult<()> {
        let started = Instant::now();
        write.send(Message::Text(text)).await?;
        self.sink.latency("ws_send", started.elapsed());
        Ok(())
    }

    /// Discard frames queued for a connection that no longer exists.
    async fn drain_stale_outbound(&self) {
        let mut rx = self.outbound_rx.lock().await;
        let mut dropped = 0usize;
        while let Ok(msg) = rx.try_recv() {
            if let WsOutbound::Request { id, .. } = msg {
                self.pending.cancel(id);
            }
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded stale outbound frames");
        }
    }
}
