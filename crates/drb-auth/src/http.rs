//! HTTP transport for JSON-RPC calls.
//!
//! Abstracts the POST so the token refresher and the order client can be
//! driven by a scripted transport in tests.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use drb_core::{RpcErrorPayload, RpcResponse};
use parking_lot::Mutex;
use reqwest::Client;
use tracing::debug;

use crate::error::TransportError;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// JSON-RPC POST.
#[derive(Clone)]
pub struct HttpRequest {
    pub url: String,
    /// Bearer token for private methods.
    pub bearer: Option<String>,
    pub body: serde_json::Value,
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("url", &self.url)
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .field("method", &self.body.get("method"))
            .finish()
    }
}

impl HttpRequest {
    /// JSON-RPC method name in the body.
    pub fn method(&self) -> Option<&str> {
        self.body.get("method").and_then(serde_json::Value::as_str)
    }
}

/// Raw HTTP response. Any status is returned; callers interpret it.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Why a JSON-RPC call over HTTP did not produce a `result`.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcFailure {
    /// Non-2xx status with a body that is not a JSON-RPC error.
    Status { status: u16, body: String },
    /// 2xx status but the body is not a usable JSON-RPC response.
    Malformed(String),
    /// Well-formed JSON-RPC `error` object (any status).
    Exchange(RpcErrorPayload),
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as a JSON-RPC response and return its `result`.
    ///
    /// The exchange answers rejected calls with a 4xx status and a JSON-RPC
    /// error body, so the error object takes precedence over the status.
    pub fn rpc_result(&self) -> Result<serde_json::Value, RpcFailure> {
        match RpcResponse::parse(&self.body) {
            Ok(response) => match response.into_result() {
                Ok(result) if self.is_success() => Ok(result),
                Ok(_) => Err(RpcFailure::Status {
                    status: self.status,
                    body: self.body.clone(),
                }),
                Err(payload) => Err(RpcFailure::Exchange(payload)),
            },
            Err(_) if !self.is_success() => Err(RpcFailure::Status {
                status: self.status,
                body: self.body.clone(),
            }),
            Err(e) => Err(RpcFailure::Malformed(e.to_string())),
        }
    }
}

/// Trait for posting JSON-RPC bodies.
pub trait HttpTransport: Send + Sync {
    fn post(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>>;
}

/// Production transport on `reqwest`.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Build(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn post(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            debug!(url = %request.url, method = ?request.method(), "HTTP POST");

            let mut builder = self.client.post(&request.url).json(&request.body);
            if let Some(token) = &request.bearer {
                builder = builder.bearer_auth(token);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Request(e.to_string())
                }
            })?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::Request(format!("Failed to read body: {e}")))?;

            Ok(HttpResponse { status, body })
        })
    }
}

/// Scripted transport for tests.
///
/// Pops one queued outcome per call and records every request with the
/// tokio instant it was made at.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<(tokio::time::Instant, HttpRequest)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response with a JSON body.
    pub fn push_response(&self, status: u16, body: serde_json::Value) {
        self.script.lock().push_back(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
    }

    /// Queue a successful JSON-RPC `result`.
    pub fn push_result(&self, result: serde_json::Value) {
        self.push_response(
            200,
            serde_json::json!({"jsonrpc": "2.0", "id": 0, "result": result}),
        );
    }

    /// Queue a JSON-RPC `error` with the given status.
    pub fn push_rpc_error(&self, status: u16, code: i64, message: &str) {
        self.push_response(
            status,
            serde_json::json!({"jsonrpc": "2.0", "id": 0, "error": {"code": code, "message": message}}),
        );
    }

    /// Queue a successful `public/auth` result.
    pub fn push_auth_ok(&self, access_token: &str, refresh_token: &str, expires_in: i64) {
        self.push_result(serde_json::json!({
            "access_token": access_token,
            "refresh_token": refresh_token,
            "expires_in": expires_in,
            "scope": "connection",
            "token_type": "bearer",
        }));
    }

    /// Queue a transport failure.
    pub fn push_error(&self, error: TransportError) {
        self.script.lock().push_back(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Recorded requests, in call order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    /// Instants at which each call was made.
    pub fn call_instants(&self) -> Vec<tokio::time::Instant> {
        self.requests.lock().iter().map(|(at, _)| *at).collect()
    }
}

impl HttpTransport for ScriptedTransport {
    fn post(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            self.requests
                .lock()
                .push((tokio::time::Instant::now(), request));
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Request("no scripted response".to_string())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, body: serde_json::Value) -> HttpResponse {
        HttpResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_rpc_result_success() {
        let r = response(200, json!({"jsonrpc": "2.0", "id": 1, "result": {"x": 1}}));
        assert_eq!(r.rpc_result().unwrap()["x"], 1);
    }

    #[test]
    fn test_rpc_error_body_wins_over_status() {
        let r = response(
            400,
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": 10009, "message": "not_enough_funds"}}),
        );
        match r.rpc_result() {
            Err(RpcFailure::Exchange(p)) => assert_eq!(p.code, 10009),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_non_json_error_status() {
        let r = HttpResponse {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert!(matches!(r.rpc_result(), Err(RpcFailure::Status { status: 502, .. })));
    }

    #[test]
    fn test_malformed_success_body() {
        let r = response(200, json!({"hello": "world"}));
        assert!(matches!(r.rpc_result(), Err(RpcFailure::Malformed(_))));
    }

    #[test]
    fn test_request_debug_redacts_bearer() {
        let req = HttpRequest {
            url: "https://example.test/api/v2/private/buy".to_string(),
            bearer: Some("secret-token".to_string()),
            body: json!({"method": "private/buy"}),
        };
        assert!(!format!("{req:?}").contains("secret-token"));
        assert_eq!(req.method(), Some("private/buy"));
    }

    #[tokio::test]
    async fn test_scripted_transport_pops_in_order() {
        let t = ScriptedTransport::new();
        t.push_error(TransportError::Timeout);
        t.push_result(json!(true));

        let req = HttpRequest {
            url: "u".to_string(),
            bearer: None,
            body: json!({}),
        };
        assert_eq!(t.post(req.clone()).await.unwrap_err(), TransportError::Timeout);
        assert!(t.post(req.clone()).await.unwrap().is_success());
        assert!(t.post(req).await.is_err());
        assert_eq!(t.call_count(), 3);
    }
}
