//! JSON-RPC 2.0 envelope shared by the HTTP and streaming transports.
//!
//! Requests: `{jsonrpc, id, method, params}`.
//! Responses: `{id, result}` or `{id, error}`.
//! Streaming notifications: `{method, params: {channel, data}}`.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version string carried by every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outgoing JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<P> {
    pub jsonrpc: &'static str,
    /// Correlation ID. Echoed back in the response.
    pub id: u64,
    pub method: String,
    pub params: P,
}

impl<P: Serialize> RpcRequest<P> {
    /// Create a new request.
    pub fn new(id: u64, method: impl Into<String>, params: P) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to a JSON string for the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to a `serde_json::Value` (HTTP bodies).
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Structured `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorPayload {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for RpcErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(data) => write!(f, "code={} message={} data={}", self.code, self.message, data),
            None => write!(f, "code={} message={}", self.code, self.message),
        }
    }
}

/// Incoming JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    /// Correlation ID (absent on some server-side error replies).
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcErrorPayload>,
    /// Server receive timestamp (microseconds).
    #[serde(rename = "usIn", default)]
    pub us_in: Option<u64>,
    /// Server send timestamp (microseconds).
    #[serde(rename = "usOut", default)]
    pub us_out: Option<u64>,
}

impl RpcResponse {
    /// Parse a response body.
    ///
    /// Fails if the body is not JSON or carries neither `result` nor `error`.
    pub fn parse(text: &str) -> Result<Self> {
        let response: Self = serde_json::from_str(text)?;
        if response.result.is_none() && response.error.is_none() {
            return Err(CoreError::MalformedRpc(
                "response has neither result nor error".to_string(),
            ));
        }
        Ok(response)
    }

    /// Check if this is an error response.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split into the success value or the exchange error.
    pub fn into_result(self) -> std::result::Result<serde_json::Value, RpcErrorPayload> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Err(RpcErrorPayload {
                code: 0,
                message: "empty response".to_string(),
                data: None,
            }),
        }
    }

    /// Server-side processing time, when both timestamps are present.
    pub fn server_time_us(&self) -> Option<u64> {
        match (self.us_in, self.us_out) {
            (Some(usin), Some(usout)) => Some(usout.saturating_sub(usin)),
            _ => None,
        }
    }
}

/// Parameters of a channel notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationParams {
    pub channel: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Server push for a subscribed channel (`method = "subscription"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub method: String,
    pub params: NotificationParams,
}

impl RpcNotification {
    /// Channel this notification belongs to.
    pub fn channel(&self) -> &str {
        &self.params.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_envelope() {
        let req = RpcRequest::new(42, "public/subscribe", json!({"channels": ["book.BTC-PERPETUAL.raw"]}));
        let value = req.to_value().unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 42);
        assert_eq!(value["method"], "public/subscribe");
        assert_eq!(value["params"]["channels"][0], "book.BTC-PERPETUAL.raw");
    }

    #[test]
    fn test_response_result() {
        let resp = RpcResponse::parse(r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true},"usIn":10,"usOut":25}"#)
            .unwrap();
        assert_eq!(resp.id, Some(7));
        assert!(!resp.is_error());
        assert_eq!(resp.server_time_us(), Some(15));
        assert_eq!(resp.into_result().unwrap()["ok"], true);
    }

    #[test]
    fn test_response_error() {
        let resp = RpcResponse::parse(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":13009,"message":"invalid_token"}}"#,
        )
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, 13009);
        assert_eq!(err.to_string(), "code=13009 message=invalid_token");
    }

    #[test]
    fn test_response_without_result_or_error_is_malformed() {
        let err = RpcResponse::parse(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert!(matches!(err, CoreError::MalformedRpc(_)));
    }

    #[test]
    fn test_notification_parse() {
        let n: RpcNotification = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"ticker.BTC-PERPETUAL.raw","data":{"last_price":1}}}"#,
        )
        .unwrap();
        assert_eq!(n.channel(), "ticker.BTC-PERPETUAL.raw");
        assert_eq!(n.params.data["last_price"], 1);
    }
}
