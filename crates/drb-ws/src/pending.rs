//! Correlation of streaming requests with their responses.
//!
//! Every outbound request gets a fresh id and an entry describing what it
//! was. The router takes the entry when the response arrives, so
//! classification depends on the request kind rather than fixed ids.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use drb_core::RpcResponse;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{WsError, WsResult};

/// What an outstanding request was for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Auth,
    Subscribe { channels: BTreeSet<String> },
    Positions { currency: String },
    SetHeartbeat,
    /// Reply to a heartbeat `test_request`.
    Test,
}

impl RequestKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Subscribe { .. } => "subscribe",
            Self::Positions { .. } => "positions",
            Self::SetHeartbeat => "set_heartbeat",
            Self::Test => "test",
        }
    }
}

#[derive(Debug)]
struct PendingRequest {
    kind: RequestKind,
    responder: oneshot::Sender<RpcResponse>,
}

/// Outstanding requests keyed by correlation id.
#[derive(Debug)]
pub struct PendingRequests {
    next_id: AtomicU64,
    inflight: Mutex<HashMap<u64, PendingRequest>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate an id and record the request.
    pub fn register(&self, kind: RequestKind) -> (u64, PendingResponse) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inflight.lock().insert(
            id,
            PendingRequest {
                kind,
                responder: tx,
            },
        );
        (id, PendingResponse { id, rx })
    }

    /// Kind of an outstanding request, without removing it.
    pub fn kind_of(&self, id: u64) -> Option<RequestKind> {
        self.inflight.lock().get(&id).map(|p| p.kind.clone())
    }

    /// Remove the entry for `id` and hand the response to its waiter.
    ///
    /// Returns the request kind, or `None` for unknown ids.
    pub fn resolve(&self, id: u64, response: RpcResponse) -> Option<RequestKind> {
        let pending = self.inflight.lock().remove(&id)?;
        // Waiter may have been dropped; fire-and-forget requests never wait.
        let _ = pending.responder.send(response);
        Some(pending.kind)
    }

    /// Drop an entry whose request never made it onto the wire.
    pub fn cancel(&self, id: u64) {
        self.inflight.lock().remove(&id);
    }

    /// Drop every entry. Waiters resolve with `ConnectionClosed`.
    pub fn clear(&self) -> usize {
        let mut inflight = self.inflight.lock();
        let dropped = inflight.len();
        inflight.clear();
        if dropped > 0 {
            debug!(dropped, "Cleared pending requests");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.lock().is_empty()
    }
}

/// Future for the response to one request.
///
/// Resolves to the `result` value, the exchange error, or
/// `ConnectionClosed` if the connection went away first.
#[derive(Debug)]
pub struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<RpcResponse>,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingResponse {
    type Output = WsResult<serde_json::Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(response)) => {
                Poll::Ready(response.into_result().map_err(WsError::Exchange))
            }
            Poll::Ready(Err(_)) => Poll::Ready(Err(WsError::abandoned())),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(id: u64, body: serde_json::Value) -> RpcResponse {
        let mut frame = json!({"jsonrpc": "2.0", "id": id});
        if let (Some(obj), Some(extra)) = (frame.as_object_mut(), body.as_object()) {
            obj.extend(extra.clone());
        }
        serde_json::from_value(frame).unwrap()
    }

    #[test]
    fn test_ids_are_unique() {
        let pending = PendingRequests::new();
        let (a, _ra) = pending.register(RequestKind::Auth);
        let (b, _rb) = pending.register(RequestKind::SetHeartbeat);
        assert_ne!(a, b);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.kind_of(a), Some(RequestKind::Auth));
    }

    #[tokio::test]
    async fn test_resolve_delivers_result() {
        let pending = PendingRequests::new();
        let (id, rx) = pending.register(RequestKind::Positions {
            currency: "BTC".to_string(),
        });

        let kind = pending.resolve(id, response(id, json!({"result": [{"size": 10}]})));
        assert!(matches!(kind, Some(RequestKind::Positions { .. })));
        assert!(pending.is_empty());

        let value = rx.await.unwrap();
        assert_eq!(value[0]["size"], 10);
    }

    #[test]
    fn test_response_pending_until_resolved() {
        let pending = PendingRequests::new();
        let (id, rx) = pending.register(RequestKind::SetHeartbeat);
        let mut waiter = tokio_test::task::spawn(rx);
        tokio_test::assert_pending!(waiter.poll());

        pending.resolve(id, response(id, json!({"result": "ok"})));
        assert!(waiter.is_woken());
        let value = tokio_test::assert_ready_ok!(waiter.poll());
        assert_eq!(value, "ok");
    }

    #[tokio::test]
    async fn test_resolve_delivers_exchange_error() {
        let pending = PendingRequests::new();
        let (id, rx) = pending.register(RequestKind::Test);
        pending.resolve(
            id,
            response(id, json!({"error": {"code": 13009, "message": "unauthorized"}})),
        );
        match rx.await {
            Err(WsError::Exchange(payload)) => assert_eq!(payload.code, 13009),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clear_fails_waiters() {
        let pending = PendingRequests::new();
        let (_, rx) = pending.register(RequestKind::Auth);
        assert_eq!(pending.clear(), 1);
        assert!(matches!(rx.await, Err(WsError::ConnectionClosed { .. })));
    }

    #[test]
    fn test_unknown_id() {
        let pending = PendingRequests::new();
        assert!(pending.resolve(99, response(99, json!({"result": true}))).is_none());
    }

    #[test]
    fn test_dropped_waiter_still_resolves_kind() {
        let pending = PendingRequests::new();
        let (id, rx) = pending.register(RequestKind::Auth);
        drop(rx);
        assert_eq!(
            pending.resolve(id, response(id, json!({"result": {}}))),
            Some(RequestKind::Auth)
        );
    }
}
