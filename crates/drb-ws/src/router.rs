//! Inbound message classification and fan-out.
//!
//! Rules, first match wins:
//! 1. channel contains `book.`   -> OrderBook
//! 2. channel contains `ticker.` -> MarketTrade
//! 3. response to a positions request -> Positions
//! 4. response to an auth request -> suppressed
//! 5. anything else -> Raw
//!
//! Heartbeat notifications never reach the sink.

use std::sync::Arc;
use std::time::Instant;

use drb_core::{Category, EventSink, InboundMessage, BOOK_PREFIX, TICKER_PREFIX};
use serde_json::Value;
use tracing::{debug, warn};

use crate::message::WsMessage;
use crate::pending::{PendingRequests, RequestKind};

/// Where a frame goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Deliver(Category),
    Suppress,
}

/// Classify a channel name.
pub fn classify_channel(channel: &str) -> Category {
    if channel.contains(BOOK_PREFIX) {
        Category::OrderBook
    } else if channel.contains(TICKER_PREFIX) {
        Category::MarketTrade
    } else {
        Category::Raw
    }
}

/// Classify a response by the kind of request it answers.
pub fn classify_response(kind: Option<&RequestKind>) -> Route {
    match kind {
        Some(RequestKind::Positions { .. }) => Route::Deliver(Category::Positions),
        Some(RequestKind::Auth) | Some(RequestKind::Test) => Route::Suppress,
        _ => Route::Deliver(Category::Raw),
    }
}

/// What the connection loop must do after routing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Handled,
    /// Server sent a heartbeat `test_request`; reply with `public/test`.
    ReplyTest,
    /// Frame was not valid JSON.
    Malformed,
}

/// Classifies frames and hands them to the sink.
pub struct MessageRouter {
    pending: Arc<PendingRequests>,
    sink: Arc<dyn EventSink>,
}

impl MessageRouter {
    pub fn new(pending: Arc<PendingRequests>, sink: Arc<dyn EventSink>) -> Self {
        Self { pending, sink }
    }

    /// Route one text frame.
    pub fn route(&self, text: &str) -> RouteOutcome {
        let started = Instant::now();

        let frame: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, len = text.len(), "Dropping malformed frame");
                return RouteOutcome::Malformed;
            }
        };

        let (route, outcome) = match WsMessage::from_value(&frame) {
            WsMessage::Heartbeat(params) => {
                debug!(kind = %params.kind, "Heartbeat received");
                let outcome = if params.is_test_request() {
                    RouteOutcome::ReplyTest
                } else {
                    RouteOutcome::Handled
                };
                (Route::Suppress, outcome)
            }
            WsMessage::Notification(n) => (
                Route::Deliver(classify_channel(n.channel())),
                RouteOutcome::Handled,
            ),
            WsMessage::Response(response) => {
                let id = response.id;
                let is_error = response.is_error();
                let kind = id.and_then(|id| self.pending.resolve(id, response));
                if is_error {
                    self.log_error_response(id, kind.as_ref(), &frame);
                }
                (classify_response(kind.as_ref()), RouteOutcome::Handled)
            }
            WsMessage::Other => (Route::Deliver(Category::Raw), RouteOutcome::Handled),
        };

        if let Route::Deliver(category) = route {
            self.sink
                .deliver(&InboundMessage::new(text.to_string(), frame, category));
        }

        self.sink.latency("frame", started.elapsed());
        outcome
    }

    fn log_error_response(&self, id: Option<u64>, kind: Option<&RequestKind>, frame: &Value) {
        match kind {
            // Auth bodies stay out of logs.
            Some(RequestKind::Auth) => {
                warn!(id, code = ?frame["error"]["code"], "Streaming auth rejected");
            }
            Some(RequestKind::Subscribe { channels }) => {
                warn!(id, channels = ?channels, error = %frame["error"], "Subscribe rejected");
            }
            Some(kind) => {
                warn!(id, request = kind.name(), error = %frame["error"], "Request failed");
            }
            None => {
                warn!(id, error = %frame["error"], "Error response for unknown request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(Category, Value)>>,
    }

    impl EventSink for RecordingSink {
        fn deliver(&self, msg: &InboundMessage) {
            self.delivered.lock().push((msg.category, msg.frame.clone()));
        }
        fn order_event(&self, _event: &str, _payload: &Value) {}
        fn latency(&self, _label: &'static str, _elapsed: Duration) {}
    }

    fn router() -> (Arc<PendingRequests>, Arc<RecordingSink>, MessageRouter) {
        let pending = Arc::new(PendingRequests::new());
        let sink = Arc::new(RecordingSink::default());
        let router = MessageRouter::new(pending.clone(), sink.clone());
        (pending, sink, router)
    }

    fn notification(channel: &str) -> String {
        json!({"jsonrpc": "2.0", "method": "subscription", "params": {"channel": channel, "data": {}}})
            .to_string()
    }

    #[test]
    fn test_classify_channels() {
        assert_eq!(classify_channel("book.ETH-PERPETUAL.raw"), Category::OrderBook);
        assert_eq!(classify_channel("ticker.BTC-PERPETUAL.raw"), Category::MarketTrade);
        assert_eq!(classify_channel("user.portfolio.btc"), Category::Raw);
    }

    #[test]
    fn test_classify_responses() {
        let positions = RequestKind::Positions {
            currency: "BTC".to_string(),
        };
        assert_eq!(
            classify_response(Some(&positions)),
            Route::Deliver(Category::Positions)
        );
        assert_eq!(classify_response(Some(&RequestKind::Auth)), Route::Suppress);
        assert_eq!(
            classify_response(Some(&RequestKind::SetHeartbeat)),
            Route::Deliver(Category::Raw)
        );
        assert_eq!(classify_response(None), Route::Deliver(Category::Raw));
    }

    #[test]
    fn test_notifications_routed_by_channel() {
        let (_pending, sink, router) = router();
        router.route(&notification("book.ETH-PERPETUAL.raw"));
        router.route(&notification("ticker.BTC-PERPETUAL.raw"));
        router.route(&notification("deribit_price_index.btc_usd"));

        let categories: Vec<Category> = sink.delivered.lock().iter().map(|(c, _)| *c).collect();
        assert_eq!(
            categories,
            vec![Category::OrderBook, Category::MarketTrade, Category::Raw]
        );
    }

    #[test]
    fn test_correlated_responses() {
        let (pending, sink, router) = router();
        let (auth_id, _auth_rx) = pending.register(RequestKind::Auth);
        let (pos_id, _pos_rx) = pending.register(RequestKind::Positions {
            currency: "BTC".to_string(),
        });
        let (sub_id, _sub_rx) = pending.register(RequestKind::Subscribe {
            channels: ["book.BTC-PERPETUAL.raw".to_string()].into(),
        });

        router.route(&json!({"jsonrpc": "2.0", "id": auth_id, "result": {"access_token": "x"}}).to_string());
        router.route(&json!({"jsonrpc": "2.0", "id": pos_id, "result": []}).to_string());
        router.route(&json!({"jsonrpc": "2.0", "id": sub_id, "result": ["book.BTC-PERPETUAL.raw"]}).to_string());
        router.route(&json!({"jsonrpc": "2.0", "id": 999, "result": true}).to_string());

        let delivered = sink.delivered.lock();
        let categories: Vec<Category> = delivered.iter().map(|(c, _)| *c).collect();
        assert_eq!(
            categories,
            vec![Category::Positions, Category::Raw, Category::Raw]
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn test_heartbeats_are_internal() {
        let (_pending, sink, router) = router();
        let outcome = router.route(
            &json!({"jsonrpc": "2.0", "method": "heartbeat", "params": {"type": "test_request"}})
                .to_string(),
        );
        assert_eq!(outcome, RouteOutcome::ReplyTest);

        let outcome = router.route(
            &json!({"jsonrpc": "2.0", "method": "heartbeat", "params": {"type": "heartbeat"}})
                .to_string(),
        );
        assert_eq!(outcome, RouteOutcome::Handled);
        assert!(sink.delivered.lock().is_empty());
    }

    #[test]
    fn test_malformed_frame_dropped() {
        let (_pending, sink, router) = router();
        assert_eq!(router.route("{not json"), RouteOutcome::Malformed);
        assert!(sink.delivered.lock().is_empty());
    }
}
