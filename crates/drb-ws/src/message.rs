//! WebSocket message types.
//!
//! Outbound request builders and the shape of inbound frames.

use std::collections::BTreeSet;

use drb_auth::Credential;
use drb_core::{RpcNotification, RpcRequest, RpcResponse};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::WsResult;

pub const METHOD_AUTH: &str = "public/auth";
pub const METHOD_SUBSCRIBE: &str = "public/subscribe";
pub const METHOD_GET_POSITIONS: &str = "private/get_positions";
pub const METHOD_SET_HEARTBEAT: &str = "public/set_heartbeat";
pub const METHOD_TEST: &str = "public/test";

/// Notification method for channel data.
pub const SUBSCRIPTION_METHOD: &str = "subscription";
/// Notification method for server heartbeats.
pub const HEARTBEAT_METHOD: &str = "heartbeat";

/// Outbound request builders.
pub struct WsRequest;

impl WsRequest {
    /// Streaming auth with the client_credentials grant.
    pub fn auth(id: u64, credential: &Credential, scope: Option<&str>) -> WsResult<String> {
        Ok(RpcRequest::new(id, METHOD_AUTH, credential.grant_params(scope)).to_json()?)
    }

    pub fn subscribe(
        id: u64,
        channels: &BTreeSet<String>,
        access_token: Option<&str>,
    ) -> WsResult<String> {
        let mut params = json!({ "channels": channels });
        with_access_token(&mut params, access_token);
        Ok(RpcRequest::new(id, METHOD_SUBSCRIBE, params).to_json()?)
    }

    pub fn get_positions(
        id: u64,
        currency: &str,
        kind: Option<&str>,
        access_token: Option<&str>,
    ) -> WsResult<String> {
        let mut params = json!({ "currency": currency });
        if let Some(kind) = kind {
            params["kind"] = Value::String(kind.to_string());
        }
        with_access_token(&mut params, access_token);
        Ok(RpcRequest::new(id, METHOD_GET_POSITIONS, params).to_json()?)
    }

    /// Ask the server to send heartbeats every `interval_secs`.
    pub fn set_heartbeat(id: u64, interval_secs: u64) -> WsResult<String> {
        Ok(RpcRequest::new(id, METHOD_SET_HEARTBEAT, json!({ "interval": interval_secs })).to_json()?)
    }

    /// Answer to a heartbeat `test_request`.
    pub fn test(id: u64) -> WsResult<String> {
        Ok(RpcRequest::new(id, METHOD_TEST, json!({})).to_json()?)
    }
}

fn with_access_token(params: &mut Value, access_token: Option<&str>) {
    if let Some(token) = access_token {
        params["access_token"] = Value::String(token.to_string());
    }
}

/// Server heartbeat notification params.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatParams {
    #[serde(rename = "type")]
    pub kind: String,
}

impl HeartbeatParams {
    /// Server expects a `public/test` reply.
    pub fn is_test_request(&self) -> bool {
        self.kind == "test_request"
    }
}

/// Inbound frame.
#[derive(Debug, Clone)]
pub enum WsMessage {
    /// Channel data (`method = "subscription"`).
    Notification(RpcNotification),
    /// Server heartbeat (`method = "heartbeat"`).
    Heartbeat(HeartbeatParams),
    /// Response to one of our requests.
    Response(RpcResponse),
    /// Anything else that is valid JSON.
    Other,
}

impl WsMessage {
    /// Interpret a parsed frame.
    pub fn from_value(frame: &Value) -> Self {
        match frame.get("method").and_then(Value::as_str) {
            Some(SUBSCRIPTION_METHOD) => RpcNotification::deserialize(frame)
                .map(Self::Notification)
                .unwrap_or(Self::Other),
            Some(HEARTBEAT_METHOD) => frame
                .get("params")
                .and_then(|p| HeartbeatParams::deserialize(p).ok())
                .map_or(Self::Other, Self::Heartbeat),
            Some(_) => Self::Other,
            None if frame.get("id").is_some_and(|id| !id.is_null()) => {
                RpcResponse::deserialize(frame)
                    .map(Self::Response)
                    .unwrap_or(Self::Other)
            }
            None => Self::Other,
        }
    }

    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Notification(n) => Some(n.channel()),
            _ => None,
        }
    }
}
