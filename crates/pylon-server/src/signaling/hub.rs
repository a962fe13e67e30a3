//! Signaling hub.
//!
//! Owns the duplex channel to every connected peer, enforces per-id
//! uniqueness (newer connection preempts the incumbent), routes messages
//! by recipient id, probes liveness, evicts stale peers, and bridges
//! synchronous HTTP connect requests into an edge's channel.
//!
//! Each connection owns a write handle (mpsc into a writer task holding
//! the socket sink) and a cancellation token that is a child of the hub's
//! root token; cancelling the hub cascades into every connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pylon_core::config::{SignalingConfig, TurnConfig};

use crate::registry::{Peer, PeerKind, PeerRegistry};
use crate::storage::ServiceStore;
use crate::turn::secrets::SecretRing;
use crate::turn::{self, credentials, TurnCredentials};

use super::message::{ClientConnectRequest, SignalingMessage};
use super::service_sync;

/// Deadline for a single outbound write.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Deadline for a single inbound read; pongs reset it.
pub const READ_WAIT: Duration = Duration::from_secs(60);
/// Liveness probe interval.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Ceiling on the synchronous client-connect wait.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const OUTBOUND_BUFFER: usize = 64;

/// Failure modes of an outbound send.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("write deadline exceeded")]
    Timeout,

    #[error("connection closed")]
    Closed,
}

/// Terminal outcomes of the synchronous client-connect bridge.
#[derive(Debug, thiserror::Error)]
pub enum ClientConnectError {
    #[error("Edge {0} is not online")]
    EdgeOffline(String),

    #[error("Failed to send request to edge")]
    SendFailed,

    #[error("Timeout waiting for edge response")]
    Timeout,

    #[error("Edge connection closed before responding")]
    EdgeVanished,
}

/// One admitted peer connection: the write handle to its socket, the
/// cancellation token scoping its tasks, and (for edges) the response
/// slots used by the synchronous API bridge.
pub struct PeerConnection {
    pub peer: Peer,
    msg_tx: mpsc::Sender<Message>,
    pub cancel: CancellationToken,
    /// Pending synchronous responses keyed by client id. Only populated
    /// for edge peers.
    pending: RwLock<HashMap<String, oneshot::Sender<SignalingMessage>>>,
}

impl PeerConnection {
    fn new(peer: Peer, msg_tx: mpsc::Sender<Message>, cancel: CancellationToken) -> Self {
        Self {
            peer,
            msg_tx,
            cancel,
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Serialize and queue a message for this peer under the write
    /// deadline.
    pub async fn send(&self, msg: &SignalingMessage) -> Result<(), SendError> {
        let text = serde_json::to_string(msg)?;
        self.msg_tx
            .send_timeout(Message::Text(text), WRITE_WAIT)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SendError::Timeout,
                SendTimeoutError::Closed(_) => SendError::Closed,
            })
    }

    /// Register a response slot for a client id and return its receiver.
    /// A second registration under the same id replaces the first.
    pub async fn register_pending(&self, client_id: String) -> oneshot::Receiver<SignalingMessage> {
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(client_id, tx);
        rx
    }

    /// Deliver a response into the slot for `client_id`, removing it.
    /// Returns false when no slot is waiting.
    pub async fn complete_pending(&self, client_id: &str, msg: SignalingMessage) -> bool {
        if let Some(tx) = self.pending.write().await.remove(client_id) {
            tx.send(msg).is_ok()
        } else {
            false
        }
    }

    /// Drop the slot for `client_id`, if any.
    pub async fn remove_pending(&self, client_id: &str) {
        self.pending.write().await.remove(client_id);
    }

    /// Drop every waiting slot (the waiters observe the closed channel).
    pub async fn cancel_all_pending(&self) {
        self.pending.write().await.clear();
    }
}

/// The signaling hub.
pub struct SignalingHub {
    connections: RwLock<HashMap<String, Arc<PeerConnection>>>,
    registry: Arc<PeerRegistry>,
    store: ServiceStore,
    secrets: Arc<SecretRing>,
    turn_cfg: TurnConfig,
    session_timeout: Duration,
    cancel: CancellationToken,
}

impl SignalingHub {
    pub fn new(
        cfg: &SignalingConfig,
        turn_cfg: TurnConfig,
        registry: Arc<PeerRegistry>,
        store: ServiceStore,
        secrets: Arc<SecretRing>,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            registry,
            store,
            secrets,
            turn_cfg,
            session_timeout: cfg.session_timeout(),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn store(&self) -> &ServiceStore {
        &self.store
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether a peer currently holds a connection.
    pub async fn is_connected(&self, id: &str) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// Cancel the hub root token; cascades into every connection's
    /// monitor and read loop and releases their resources.
    pub async fn shutdown(&self) {
        info!("Stopping signaling hub");
        self.cancel.cancel();

        let connections = self.connections.read().await;
        for conn in connections.values() {
            conn.cancel.cancel();
        }
    }

    /// Install a connection for a peer, preempting any incumbent with the
    /// same id, and admit the peer to the registry.
    pub(crate) async fn admit(
        &self,
        peer: Peer,
        msg_tx: mpsc::Sender<Message>,
    ) -> Arc<PeerConnection> {
        let conn = Arc::new(PeerConnection::new(
            peer.clone(),
            msg_tx,
            self.cancel.child_token(),
        ));

        {
            let mut connections = self.connections.write().await;
            if let Some(old) = connections.insert(peer.id.clone(), Arc::clone(&conn)) {
                warn!(
                    peer_id = %peer.id,
                    peer_type = %peer.kind,
                    "Duplicate connection detected, closing old connection"
                );
                old.cancel.cancel();
                old.cancel_all_pending().await;
            }
        }

        self.registry.admit(peer).await;
        conn
    }

    /// Remove a connection's hub entry and registry row, but only while
    /// the map still points at this exact connection. Teardown of a
    /// preempted incumbent must not delete its replacement.
    pub(crate) async fn release(&self, conn: &Arc<PeerConnection>) {
        let mut connections = self.connections.write().await;
        let still_registered = connections
            .get(&conn.peer.id)
            .is_some_and(|current| Arc::ptr_eq(current, conn));

        if still_registered {
            connections.remove(&conn.peer.id);
            drop(connections);
            self.registry.remove(&conn.peer.id).await;
            info!(peer_id = %conn.peer.id, peer_type = %conn.peer.kind, "Peer disconnected");
        }
    }

    /// Drive an upgraded WebSocket for its whole life: admission, writer
    /// and monitor tasks, the read loop, and teardown.
    pub async fn run_connection(self: Arc<Self>, socket: WebSocket, peer: Peer) {
        let (msg_tx, msg_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let conn = self.admit(peer, msg_tx).await;

        info!(peer_id = %conn.peer.id, peer_type = %conn.peer.kind, "Peer connected");

        let (sink, stream) = socket.split();
        let writer = tokio::spawn(write_loop(sink, msg_rx, Arc::clone(&conn)));
        let monitor = tokio::spawn(monitor_loop(Arc::clone(&conn)));

        self.read_loop(&conn, stream).await;

        conn.cancel.cancel();
        conn.cancel_all_pending().await;
        self.release(&conn).await;

        let _ = writer.await;
        let _ = monitor.await;
    }

    /// Read frames until the channel closes, a deadline passes, or the
    /// connection is cancelled. Pongs refresh the peer's liveness.
    async fn read_loop(&self, conn: &Arc<PeerConnection>, mut stream: SplitStream<WebSocket>) {
        loop {
            tokio::select! {
                _ = conn.cancel.cancelled() => break,
                next = timeout(READ_WAIT, stream.next()) => {
                    match next {
                        Err(_) => {
                            debug!(peer_id = %conn.peer.id, "Read deadline exceeded");
                            break;
                        }
                        Ok(None) => break,
                        Ok(Some(Err(e))) => {
                            debug!(peer_id = %conn.peer.id, error = %e, "WebSocket read error");
                            break;
                        }
                        Ok(Some(Ok(Message::Pong(_)))) => {
                            self.registry.update_last_ping(&conn.peer.id).await;
                        }
                        Ok(Some(Ok(Message::Text(text)))) => {
                            match serde_json::from_str::<SignalingMessage>(&text) {
                                Ok(msg) => self.handle_message(conn, msg).await,
                                Err(e) => {
                                    warn!(peer_id = %conn.peer.id, error = %e, "Discarding malformed frame");
                                }
                            }
                        }
                        Ok(Some(Ok(Message::Close(_)))) => break,
                        Ok(Some(Ok(_))) => {}
                    }
                }
            }
        }
    }

    /// Dispatch one inbound message. Unknown types are logged and dropped.
    pub async fn handle_message(&self, conn: &Arc<PeerConnection>, msg: SignalingMessage) {
        debug!(
            from = %conn.peer.id,
            kind = %msg.kind,
            to = msg.to.as_deref().unwrap_or(""),
            "Received message"
        );

        match msg.kind.as_str() {
            "edge:register" => self.handle_edge_register(conn, &msg).await,
            "get-peers" => self.handle_get_peers(conn).await,
            "turn-request" => self.handle_turn_request(conn).await,
            "connect-request" | "connect-response" | "offer" | "answer" | "ice-candidate" => {
                self.forward(&msg).await;
            }
            "api-connect-request" => {
                // Only ever synthesized by the HTTP bridge; a peer sending
                // it is a protocol violation worth logging, nothing more.
                warn!(from = %conn.peer.id, "Received api-connect-request on a peer channel, ignoring");
            }
            "api-connect-response" => self.handle_api_connect_response(conn, msg).await,
            service_sync::TYPE_SERVICE_SYNC => self.handle_service_sync(conn, &msg).await,
            service_sync::TYPE_SERVICE_SYNC_BATCH => {
                self.handle_service_sync_batch(conn, &msg).await;
            }
            service_sync::TYPE_SERVICE_LIST_REQUEST => {
                self.handle_service_list_request(conn).await;
            }
            other => warn!(kind = %other, from = %conn.peer.id, "Unknown message type"),
        }
    }

    /// `edge:register`: succeeds iff the announced id matches the
    /// connection's peer id. Mid-session renames are not supported.
    async fn handle_edge_register(&self, conn: &Arc<PeerConnection>, msg: &SignalingMessage) {
        let edge_id = msg
            .data
            .as_ref()
            .and_then(|d| d.get("edgeId"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        if edge_id.is_empty() {
            self.send_or_log(conn, &SignalingMessage::error("edgeId is required"))
                .await;
            return;
        }

        if conn.peer.id != edge_id {
            warn!(
                connection_id = %conn.peer.id,
                requested_id = %edge_id,
                "Edge ID mismatch during registration"
            );
            self.send_or_log(
                conn,
                &SignalingMessage::error("Edge ID must match connection ID"),
            )
            .await;
            return;
        }

        info!(edge_id = %edge_id, "Edge registered");

        self.send_or_log(
            conn,
            &SignalingMessage::with_data("edge:register-success", json!({ "edgeId": edge_id })),
        )
        .await;
    }

    /// `get-peers`: reply with a registry snapshot.
    async fn handle_get_peers(&self, conn: &Arc<PeerConnection>) {
        let peers = self.registry.list(None).await;
        match serde_json::to_value(peers) {
            Ok(data) => {
                self.send_or_log(conn, &SignalingMessage::with_data("peer-list", data))
                    .await;
            }
            Err(e) => error!(error = %e, "Failed to encode peer list"),
        }
    }

    /// `turn-request`: issue fresh credentials over the channel.
    async fn handle_turn_request(&self, conn: &Arc<PeerConnection>) {
        debug!(peer_id = %conn.peer.id, "Handling turn-request");

        let snapshot = self.secrets.snapshot();
        let cred = credentials::issue(
            conn.peer.kind.as_str(),
            &conn.peer.id,
            snapshot.ttl_secs,
            &snapshot.current,
        );

        let creds = TurnCredentials {
            username: cred.username,
            password: cred.password,
            ttl: snapshot.ttl_secs,
            expires: turn::format_expiry(cred.expires_at),
            urls: turn::ice_urls(&self.turn_cfg).flatten(),
        };

        match serde_json::to_value(creds) {
            Ok(data) => {
                self.send_or_log(conn, &SignalingMessage::with_data("turn-response", data))
                    .await;
            }
            Err(e) => error!(error = %e, "Failed to encode TURN credentials"),
        }
    }

    /// Forward a message to the connection named by `to`. A missing
    /// recipient is logged and the message dropped.
    async fn forward(&self, msg: &SignalingMessage) {
        let Some(to) = msg.to.as_deref().filter(|t| !t.is_empty()) else {
            warn!(kind = %msg.kind, "Message has no recipient");
            return;
        };

        let target = self.connections.read().await.get(to).cloned();
        let Some(target) = target else {
            warn!(to = %to, kind = %msg.kind, "Target peer not found");
            return;
        };

        if let Err(e) = target.send(msg).await {
            error!(to = %to, kind = %msg.kind, error = %e, "Failed to forward message");
        }
    }

    /// `api-connect-response`: deliver into the response slot keyed by the
    /// message's `to` (the client id).
    async fn handle_api_connect_response(&self, conn: &Arc<PeerConnection>, msg: SignalingMessage) {
        let client_id = msg.to.clone().unwrap_or_default();
        debug!(from = %conn.peer.id, client_id = %client_id, "Handling api-connect-response");

        if !conn.complete_pending(&client_id, msg).await {
            warn!(client_id = %client_id, "No waiting request for api-connect-response");
        }
    }

    /// Synchronous bridge: post an `api-connect-request` into the target
    /// edge's channel and await its response for at most
    /// [`CONNECT_TIMEOUT`]. Exactly one of response / timeout /
    /// send-failure / edge-vanished terminates the call, and the response
    /// slot is removed on every exit path.
    pub async fn client_connect(
        &self,
        req: ClientConnectRequest,
    ) -> Result<Value, ClientConnectError> {
        let conn = self.connections.read().await.get(&req.edge_id).cloned();
        let Some(conn) = conn else {
            return Err(ClientConnectError::EdgeOffline(req.edge_id));
        };
        if conn.peer.kind != PeerKind::Edge {
            return Err(ClientConnectError::EdgeOffline(req.edge_id));
        }

        let client_id = req.id.clone();
        let response_rx = conn.register_pending(client_id.clone()).await;

        let msg = match serde_json::to_value(&req) {
            Ok(data) => SignalingMessage::with_data("api-connect-request", data),
            Err(e) => {
                error!(error = %e, "Failed to encode client connect request");
                conn.remove_pending(&client_id).await;
                return Err(ClientConnectError::SendFailed);
            }
        };

        if let Err(e) = conn.send(&msg).await {
            warn!(edge_id = %conn.peer.id, error = %e, "Failed to send api-connect-request");
            conn.remove_pending(&client_id).await;
            return Err(ClientConnectError::SendFailed);
        }

        match timeout(CONNECT_TIMEOUT, response_rx).await {
            Ok(Ok(response)) => Ok(response.data.unwrap_or(Value::Null)),
            Ok(Err(_)) => {
                conn.remove_pending(&client_id).await;
                Err(ClientConnectError::EdgeVanished)
            }
            Err(_) => {
                warn!(edge_id = %conn.peer.id, client_id = %client_id, "Client connect timed out");
                conn.remove_pending(&client_id).await;
                Err(ClientConnectError::Timeout)
            }
        }
    }

    /// Periodically evict peers whose liveness evidence exceeds the
    /// session timeout, tearing down their connections.
    pub async fn run_cleanup(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.session_timeout / 2);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = self.registry.evict_older_than(self.session_timeout).await;
                    if removed.is_empty() {
                        continue;
                    }

                    info!(count = removed.len(), "Cleaned up stale peers");

                    let mut connections = self.connections.write().await;
                    for id in &removed {
                        if let Some(conn) = connections.remove(id) {
                            conn.cancel.cancel();
                        }
                    }
                }
            }
        }
    }

    pub(crate) async fn send_or_log(&self, conn: &Arc<PeerConnection>, msg: &SignalingMessage) {
        if let Err(e) = conn.send(msg).await {
            warn!(peer_id = %conn.peer.id, kind = %msg.kind, error = %e, "Failed to send message");
        }
    }
}

/// Pump queued messages into the socket sink, each under the write
/// deadline. A failed or overdue write trips the connection.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut msg_rx: mpsc::Receiver<Message>,
    conn: Arc<PeerConnection>,
) {
    loop {
        tokio::select! {
            _ = conn.cancel.cancelled() => break,
            msg = msg_rx.recv() => {
                let Some(msg) = msg else { break };
                match timeout(WRITE_WAIT, sink.send(msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(peer_id = %conn.peer.id, error = %e, "WebSocket write error");
                        conn.cancel.cancel();
                        break;
                    }
                    Err(_) => {
                        warn!(peer_id = %conn.peer.id, "Write deadline exceeded");
                        conn.cancel.cancel();
                        break;
                    }
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Send a ping frame every [`PING_INTERVAL`]; a failed enqueue trips the
/// connection.
async fn monitor_loop(conn: Arc<PeerConnection>) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    // The immediate first tick would ping before the peer settles.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = conn.cancel.cancelled() => break,
            _ = ticker.tick() => {
                let ping = Message::Ping(Vec::new());
                if conn.msg_tx.send_timeout(ping, WRITE_WAIT).await.is_err() {
                    warn!(peer_id = %conn.peer.id, "Failed to send ping");
                    conn.cancel.cancel();
                    break;
                }
            }
        }
    }
}
