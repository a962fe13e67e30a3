//! Data models for the service catalog.

use serde::{Deserialize, Serialize};

/// A service exposed by an edge device.
///
/// Ports are carried as `i64` so out-of-range wire values reach validation
/// instead of failing deserialization with an opaque error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EdgeService {
    pub id: String,
    #[serde(default)]
    pub edge_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tunnel_port: i64,
    #[serde(default)]
    pub local_host: String,
    #[serde(default)]
    pub local_port: i64,
    /// Either `http` or `websocket`.
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}
