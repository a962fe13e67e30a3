//! In-memory peer registry.
//!
//! Transient descriptors of every connected node, keyed by peer id. The
//! registry tracks liveness evidence and supports stale-age eviction;
//! connection ownership lives in the signaling hub.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// Peer role tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    /// Exposes services and terminates relayed traffic.
    Edge,
    /// Consumes services through an edge.
    Client,
}

impl PeerKind {
    /// Parse from the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "edge" => Some(Self::Edge),
            "client" => Some(Self::Client),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Edge => "edge",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected peer (edge device or client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: PeerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// For clients: the edge they are bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    pub connected: bool,
    pub last_ping: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Peer {
    pub fn new(id: impl Into<String>, kind: PeerKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            account_id: None,
            public_key: None,
            edge_id: None,
            connected: false,
            last_ping: now,
            created_at: now,
        }
    }
}

/// Thread-safe registry of connected peers.
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Add or replace a peer. Re-admission under an existing id keeps the
    /// original `created_at`; liveness state is reset.
    pub async fn admit(&self, mut peer: Peer) {
        let mut peers = self.peers.write().await;
        if let Some(existing) = peers.get(&peer.id) {
            peer.created_at = existing.created_at;
        }
        peer.connected = true;
        peer.last_ping = Utc::now();
        debug!(peer_id = %peer.id, peer_type = %peer.kind, "Peer admitted to registry");
        peers.insert(peer.id.clone(), peer);
    }

    /// Retrieve a peer snapshot by id.
    pub async fn get(&self, id: &str) -> Option<Peer> {
        self.peers.read().await.get(id).cloned()
    }

    /// Remove a peer, returning its final state.
    pub async fn remove(&self, id: &str) -> Option<Peer> {
        let mut peers = self.peers.write().await;
        peers.remove(id).map(|mut peer| {
            peer.connected = false;
            debug!(peer_id = %id, "Peer removed from registry");
            peer
        })
    }

    /// Snapshot of all peers, optionally filtered by kind.
    pub async fn list(&self, kind: Option<PeerKind>) -> Vec<Peer> {
        let peers = self.peers.read().await;
        peers
            .values()
            .filter(|p| kind.map_or(true, |k| p.kind == k))
            .cloned()
            .collect()
    }

    /// Record fresh liveness evidence for a peer.
    pub async fn update_last_ping(&self, id: &str) {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(id) {
            peer.last_ping = Utc::now();
        }
    }

    /// Number of registered peers.
    pub async fn count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Remove every peer whose last liveness evidence is older than
    /// `max_age`, returning the removed ids so callers can tear down the
    /// corresponding channels.
    pub async fn evict_older_than(&self, max_age: Duration) -> Vec<String> {
        let now = Utc::now();
        let mut peers = self.peers.write().await;

        let stale: Vec<String> = peers
            .iter()
            .filter(|(_, peer)| {
                (now - peer.last_ping).to_std().unwrap_or_default() > max_age
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            if let Some(peer) = peers.get_mut(id) {
                peer.connected = false;
            }
            peers.remove(id);
        }

        stale
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
