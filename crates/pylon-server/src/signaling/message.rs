//! Signaling wire frames.
//!
//! One UTF-8 JSON object per WebSocket frame. Payloads are opaque to the
//! hub; routing uses only `type` and `to`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Maximum accepted frame size.
pub const MAX_FRAME_BYTES: usize = 512 * 1024;

/// A signaling message: `{type, from?, to?, data?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl SignalingMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            from: None,
            to: None,
            data: None,
        }
    }

    pub fn with_data(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            from: None,
            to: None,
            data: Some(data),
        }
    }

    /// Top-level error frame sent back on a peer's own channel.
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_data("error", json!({ "error": message.into() }))
    }
}

/// Body of `POST /signaling/client/connect`, relayed verbatim to the edge
/// as the `api-connect-request` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConnectRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub edge_id: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
}
