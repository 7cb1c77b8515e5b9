//! JSON-RPC order client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use drb_auth::{HttpRequest, HttpTransport, RpcFailure, TokenRefresher, TransportError};
use drb_core::{EventSink, OrderRequest, RpcRequest};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::ack::{CancelAck, OrderAck};
use crate::error::{RestError, RestResult};

const METHOD_CANCEL: &str = "private/cancel";
const METHOD_EDIT: &str = "private/edit";

/// Order client sharing the process-wide token refresher.
pub struct RestClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    auth: Arc<TokenRefresher>,
    sink: Arc<dyn EventSink>,
    next_id: AtomicU64,
}

impl RestClient {
    /// `base_url` is the API root, e.g. `https://test.deribit.com/api/v2`.
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        auth: Arc<TokenRefresher>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
            auth,
            sink,
            next_id: AtomicU64::new(1),
        }
    }

    /// Place an order via `private/buy` or `private/sell`.
    pub async fn place_order(&self, order: &OrderRequest) -> RestResult<OrderAck> {
        let params = order.to_params()?;
        let result = self.call(order.method(), params).await?;
        let ack = OrderAck::from_result(result)?;
        info!(
            order_id = %ack.order_id(),
            instrument = %order.instrument,
            side = %order.side,
            order_type = %order.order_type,
            amount = %order.amount,
            state = ?ack.order.order_state,
            "Order placed"
        );
        Ok(ack)
    }

    pub async fn cancel_order(&self, order_id: &str) -> RestResult<CancelAck> {
        let result = self
            .call(METHOD_CANCEL, json!({ "order_id": order_id }))
            .await?;
        let ack = CancelAck::from_result(result)?;
        info!(order_id, state = ?ack.order.order_state, "Order cancelled");
        Ok(ack)
    }

    /// Change amount and price of an open order via `private/edit`.
    pub async fn modify_order(
        &self,
        order_id: &str,
        amount: Decimal,
        price: Decimal,
    ) -> RestResult<OrderAck> {
        if amount <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(RestError::InvalidRequest(drb_core::CoreError::InvalidOrder(
                format!("edit requires positive amount and price, got {amount} @ {price}"),
            )));
        }
        let params = json!({
            "order_id": order_id,
            "amount": decimal_number(amount)?,
            "price": decimal_number(price)?,
        });
        let result = self.call(METHOD_EDIT, params).await?;
        let ack = OrderAck::from_result(result)?;
        info!(order_id, %amount, %price, "Order modified");
        Ok(ack)
    }

    /// One authenticated JSON-RPC call.
    async fn call(&self, method: &'static str, params: Value) -> RestResult<Value> {
        let token = self.auth.access_token_best_effort().await.map_err(|e| {
            error!(method, error = %e, "No access token for order call");
            RestError::Auth(e)
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest::new(id, method, params).to_value()?;
        self.sink.order_event(
            "request",
            &json!({ "id": id, "method": method, "params": body["params"] }),
        );

        let started = Instant::now();
        let response = self
            .transport
            .post(HttpRequest {
                url: format!("{}/{}", self.base_url, method),
                bearer: Some(token),
                body,
            })
            .await;
        let elapsed = started.elapsed();
        self.sink.latency(method, elapsed);

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                error!(id, method, error = %e, "Order call transport failure");
                self.sink.order_event(
                    "transport_error",
                    &json!({ "id": id, "method": method, "error": e.to_string() }),
                );
                return Err(RestError::Transport(e));
            }
        };

        let payload: Value = serde_json::from_str(&response.body)
            .unwrap_or_else(|_| Value::String(response.body.clone()));
        self.sink.order_event(
            "response",
            &json!({
                "id": id,
                "method": method,
                "status": response.status,
                "elapsed_ms": elapsed.as_millis() as u64,
                "body": payload,
            }),
        );

        response.rpc_result().map_err(|failure| match failure {
            RpcFailure::Exchange(payload) => {
                warn!(
                    id,
                    method,
                    code = payload.code,
                    message = %payload.message,
                    data = ?payload.data,
                    "Order call rejected"
                );
                RestError::Exchange(payload)
            }
            RpcFailure::Status { status, body } => {
                error!(id, method, status, body = %body, "Order call HTTP failure");
                RestError::Transport(TransportError::Status { status, body })
            }
            RpcFailure::Malformed(msg) => {
                error!(id, method, error = %msg, "Malformed order response");
                RestError::Protocol(msg)
            }
        })
    }
}

/// Decimal as a JSON number.
fn decimal_number(value: Decimal) -> RestResult<Value> {
    serde_json::to_value(FloatDecimal(value))
        .map_err(|e| RestError::InvalidRequest(drb_core::CoreError::Json(e)))
}

#[derive(serde::Serialize)]
struct FloatDecimal(#[serde(with = "rust_decimal::serde::float")] Decimal);
