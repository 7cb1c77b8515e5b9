//! WebSocket write handle for sending messages.
//!
//! Sends go through a channel consumed by the connection loop, so the handle
//! stays valid across reconnects.

use crate::connection::ConnectionState;
use crate::error::{WsError, WsResult};
use crate::pending::{PendingRequests, PendingResponse, RequestKind};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Outbound message to be sent via WebSocket.
#[derive(Debug)]
pub enum WsOutbound {
    /// Uncorrelated text frame.
    Text(String),
    /// Request with a pending-response entry.
    Request { id: u64, payload: String },
}

/// Write handle for sending messages to WebSocket.
///
/// Sends fail with `WsError::NotReady` unless the connection is `Ready`.
#[derive(Clone)]
pub struct WsWriteHandle {
    tx: mpsc::Sender<WsOutbound>,
    state: watch::Receiver<ConnectionState>,
    pending: Arc<PendingRequests>,
}

impl WsWriteHandle {
    pub fn new(
        tx: mpsc::Sender<WsOutbound>,
        state: watch::Receiver<ConnectionState>,
        pending: Arc<PendingRequests>,
    ) -> Self {
        Self { tx, state, pending }
    }

    /// Queue a raw text frame.
    pub async fn send_text(&self, text: String) -> WsResult<()> {
        self.check_ready()?;
        self.tx
            .send(WsOutbound::Text(text))
            .await
            .map_err(|_| WsError::SendFailed("outbound channel closed".to_string()))
    }

    /// Queue a correlated request and return the future for its response.
    ///
    /// `build` receives the allocated id and returns the serialized frame.
    pub async fn request<F>(&self, kind: RequestKind, build: F) -> WsResult<PendingResponse>
    where
        F: FnOnce(u64) -> WsResult<String>,
    {
        self.check_ready()?;

        let request_name = kind.name();
        let (id, response) = self.pending.register(kind);
        let payload = match build(id) {
            Ok(p) => p,
            Err(e) => {
                self.pending.cancel(id);
                return Err(e);
            }
        };

        if self
            .tx
            .send(WsOutbound::Request { id, payload })
            .await
            .is_err()
        {
            self.pending.cancel(id);
            return Err(WsError::SendFailed("outbound channel closed".to_string()));
        }

        debug!(id, request = request_name, "Request queued");
        Ok(response)
    }

    pub fn is_ready(&self) -> bool {
        *self.state.borrow() == ConnectionState::Ready && !self.tx.is_closed()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// `NotReady` unless frames can be queued right now.
    pub fn check_ready(&self) -> WsResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(WsError::NotReady(format!(
                "connection is {:?}",
                self.connection_state()
            )))
        }
    }
}
