//! Route handlers.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use pylon_core::config::TurnConfig;

use crate::registry::{Peer, PeerKind, PeerRegistry};
use crate::signaling::{ClientConnectRequest, SignalingHub, MAX_FRAME_BYTES};
use crate::storage::{DatabaseError, ServiceStore};
use crate::turn::secrets::SecretRing;
use crate::turn::{self, credentials};
use crate::signaling::hub::ClientConnectError;

use super::response;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SignalingHub>,
    pub registry: Arc<PeerRegistry>,
    pub store: ServiceStore,
    pub secrets: Arc<SecretRing>,
    pub turn: TurnConfig,
}

/// `GET /api/v1/health`
pub async fn health() -> Response {
    response::success(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub peer_type: String,
    #[serde(default)]
    pub peer_id: String,
    #[serde(default)]
    pub ttl: Option<u64>,
}

/// `POST /api/v1/credentials`
pub async fn generate_credentials(
    State(state): State<AppState>,
    body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return response::bad_request("Invalid request body");
    };

    if req.peer_type.is_empty() || req.peer_id.is_empty() {
        return response::bad_request("peer_type and peer_id are required");
    }
    if PeerKind::parse(&req.peer_type).is_none() {
        return response::bad_request("peer_type must be 'edge' or 'client'");
    }

    let snapshot = state.secrets.snapshot();
    let ttl = match req.ttl {
        Some(ttl) if ttl > 0 => ttl,
        _ => snapshot.ttl_secs,
    };

    let cred = credentials::issue(&req.peer_type, &req.peer_id, ttl, &snapshot.current);

    response::success(json!({
        "username": cred.username,
        "password": cred.password,
        "ttl": ttl,
        "expires": turn::format_expiry(cred.expires_at),
    }))
}

#[derive(Debug, Deserialize)]
pub struct IceServersQuery {
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default)]
    pub peer_type: Option<String>,
}

/// `GET /api/v1/ice-servers`
pub async fn ice_servers(
    State(state): State<AppState>,
    Query(query): Query<IceServersQuery>,
) -> Response {
    let Some(peer_id) = query.peer_id.filter(|id| !id.is_empty()) else {
        return response::bad_request("peer_id query parameter is required");
    };

    let peer_type = query.peer_type.unwrap_or_else(|| "client".to_string());
    if PeerKind::parse(&peer_type).is_none() {
        return response::bad_request("peer_type must be 'edge' or 'client'");
    }

    let snapshot = state.secrets.snapshot();
    let cred = credentials::issue(&peer_type, &peer_id, snapshot.ttl_secs, &snapshot.current);
    let urls = turn::ice_urls(&state.turn);

    let mut ice_servers = vec![
        json!({ "urls": [urls.stun] }),
        json!({
            "urls": urls.turn,
            "username": cred.username,
            "credential": cred.password,
        }),
    ];
    if let Some(turns) = urls.turns {
        ice_servers.push(json!({
            "urls": [turns],
            "username": cred.username,
            "credential": cred.password,
        }));
    }

    response::success(json!({
        "ice_servers": ice_servers,
        "expires": turn::format_expiry(cred.expires_at),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PeersQuery {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// `GET /api/v1/peers`
pub async fn list_peers(State(state): State<AppState>, Query(query): Query<PeersQuery>) -> Response {
    let filter = match query.kind.as_deref().filter(|k| !k.is_empty()) {
        None => None,
        Some(kind) => match PeerKind::parse(kind) {
            Some(kind) => Some(kind),
            None => return response::bad_request("type must be 'edge' or 'client'"),
        },
    };

    let peers = state.registry.list(filter).await;
    response::success(peers)
}

/// `GET /api/v1/peers/:id`
pub async fn get_peer(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.registry.get(&id).await {
        Some(peer) => response::success(peer),
        None => response::not_found("Peer not found"),
    }
}

/// `GET /api/v1/services`
pub async fn list_services(State(state): State<AppState>) -> Response {
    match state.store.list_all_services().await {
        Ok(services) => response::success(services),
        Err(_) => response::internal_error("Failed to list services"),
    }
}

/// `DELETE /api/v1/services/:id`
pub async fn delete_service(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.delete_service(&id).await {
        Ok(()) => response::success(json!({ "message": "Service deleted successfully" })),
        Err(DatabaseError::NotFound(_)) => response::not_found("Service not found"),
        Err(_) => response::internal_error("Failed to delete service"),
    }
}

#[derive(Debug, Deserialize)]
pub struct RotateSecretsRequest {
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub old_secrets: Vec<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// `POST /api/v1/admin/secrets`
///
/// Rotates the shared ring; the TURN authenticator and credential
/// issuers observe the change immediately.
pub async fn rotate_secrets(
    State(state): State<AppState>,
    body: Result<Json<RotateSecretsRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return response::bad_request("Invalid request body");
    };

    if req.secret.is_empty() {
        return response::bad_request("secret is required");
    }

    let ttl = req
        .ttl_seconds
        .unwrap_or_else(|| state.secrets.snapshot().ttl_secs);
    state.secrets.rotate(req.secret, req.old_secrets, ttl);

    info!("TURN secrets rotated via admin API");

    response::success(json!({ "message": "TURN secrets rotated" }))
}

/// `POST /api/v1/signaling/client/connect`
pub async fn client_connect(
    State(state): State<AppState>,
    body: Result<Json<ClientConnectRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return response::bad_request("Invalid request body");
    };

    if req.id.is_empty() || req.edge_id.is_empty() || req.public_key.is_empty() {
        return response::bad_request("id, edge_id, and public_key are required");
    }

    match state.hub.client_connect(req).await {
        Ok(data) => response::success(data),
        Err(e @ ClientConnectError::EdgeOffline(_)) => response::not_found(e.to_string()),
        Err(e @ ClientConnectError::Timeout) => {
            response::error(StatusCode::REQUEST_TIMEOUT, e.to_string())
        }
        Err(e) => response::internal_error(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub edgeid: Option<String>,
    #[serde(default)]
    pub publickey: Option<String>,
}

/// `GET /api/v1/signaling/ws/:type`
///
/// Validates the admission parameters, then upgrades to the signaling
/// channel owned by the hub.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(peer_type): Path<String>,
    Query(query): Query<WsQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Some(kind) = PeerKind::parse(&peer_type) else {
        return response::bad_request("type must be 'edge' or 'client'");
    };

    let Some(id) = query.id.filter(|id| !id.is_empty()) else {
        return response::bad_request("missing id parameter");
    };

    let edge_id = query.edgeid.filter(|e| !e.is_empty());
    if kind == PeerKind::Client && edge_id.is_none() {
        return response::bad_request("missing edgeid parameter for client");
    }

    let Some(ws) = ws else {
        return response::error(StatusCode::UPGRADE_REQUIRED, "WebSocket upgrade required");
    };

    let mut peer = Peer::new(id, kind);
    peer.edge_id = edge_id;
    peer.public_key = query.publickey.filter(|k| !k.is_empty());

    let hub = Arc::clone(&state.hub);
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| hub.run_connection(socket, peer))
}
