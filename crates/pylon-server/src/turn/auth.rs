//! TURN allocation authentication.
//!
//! The relay engine invokes [`RelayAuthHandler::authenticate`] once per
//! allocation request from its own worker tasks. The handler must never
//! block on I/O: all state it needs is the in-memory [`SecretRing`] and
//! the static user table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use md5::{Digest, Md5};
use tracing::{debug, warn};

use pylon_core::config::TurnAuthConfig;

use super::credentials::{self, CredentialError};
use super::secrets::SecretRing;

/// Per-allocation authentication callback contract expected by the relay
/// engine. Implementations must be callable concurrently.
pub trait RelayAuthHandler: Send + Sync {
    /// Returns the long-term-credential key material for the allocation,
    /// or an error when the request must be rejected.
    fn authenticate(
        &self,
        username: &str,
        realm: &str,
        src_addr: SocketAddr,
    ) -> Result<Vec<u8>, AuthError>;
}

/// Authentication rejections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credential format")]
    Format,

    #[error("credential expired")]
    Expired,

    #[error("credential expiry too far in the future")]
    Future,

    #[error("no usable secret for credential")]
    BadSignature,

    #[error("unknown user")]
    UnknownUser,

    #[error("unknown auth mode: {0}")]
    UnknownMode(String),
}

/// Authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// coturn-style REST credentials (HMAC under the secret ring).
    Rest,
    /// Fixed username/password table.
    Static,
}

/// Validates TURN allocations against the shared secret ring or the static
/// user table. Holds no per-session state.
pub struct TurnAuthenticator {
    mode: AuthMode,
    secrets: Arc<SecretRing>,
    static_users: HashMap<String, String>,
}

impl TurnAuthenticator {
    pub fn new(
        mode: AuthMode,
        secrets: Arc<SecretRing>,
        static_users: HashMap<String, String>,
    ) -> Self {
        Self {
            mode,
            secrets,
            static_users,
        }
    }

    /// Build an authenticator from configuration, sharing the given ring.
    pub fn from_config(cfg: &TurnAuthConfig, secrets: Arc<SecretRing>) -> Result<Self, AuthError> {
        let mode = match cfg.mode.as_str() {
            "rest" => AuthMode::Rest,
            "static" => AuthMode::Static,
            other => return Err(AuthError::UnknownMode(other.to_string())),
        };

        let static_users = cfg
            .static_users
            .iter()
            .map(|u| (u.username.clone(), u.password.clone()))
            .collect();

        Ok(Self::new(mode, secrets, static_users))
    }

    fn rest_auth(&self, username: &str, realm: &str, src_addr: SocketAddr) -> Result<Vec<u8>, AuthError> {
        debug!(%username, %realm, %src_addr, "REST auth attempt");

        let parsed = credentials::parse(username).map_err(|_| {
            warn!(%username, "REST auth failed: invalid username format");
            AuthError::Format
        })?;

        let now = pylon_core::db::unix_timestamp().max(0) as u64;
        credentials::check_expiry(parsed.expires_at, now).map_err(|e| {
            warn!(%username, expires_at = parsed.expires_at, error = %e, "REST auth failed");
            match e {
                CredentialError::Expired => AuthError::Expired,
                _ => AuthError::Future,
            }
        })?;

        // The relay verifies message integrity against the returned key, so
        // the callback derives rather than compares; candidates() yields
        // the current secret before each grace secret.
        let snapshot = self.secrets.snapshot();
        let Some(secret) = snapshot.candidates().next() else {
            warn!(%username, "REST auth failed: no usable secret");
            return Err(AuthError::BadSignature);
        };

        let password = credentials::compute_password(secret, username);
        debug!(%username, peer_type = %parsed.peer_type, peer_id = %parsed.peer_id, "REST auth key derived");
        Ok(long_term_key(username, realm, &password))
    }

    fn static_auth(&self, username: &str, realm: &str, src_addr: SocketAddr) -> Result<Vec<u8>, AuthError> {
        debug!(%username, %realm, %src_addr, "Static auth attempt");

        let password = self.static_users.get(username).ok_or_else(|| {
            warn!(%username, "Static auth failed: user not found");
            AuthError::UnknownUser
        })?;

        Ok(long_term_key(username, realm, password))
    }
}

impl RelayAuthHandler for TurnAuthenticator {
    fn authenticate(
        &self,
        username: &str,
        realm: &str,
        src_addr: SocketAddr,
    ) -> Result<Vec<u8>, AuthError> {
        match self.mode {
            AuthMode::Rest => self.rest_auth(username, realm, src_addr),
            AuthMode::Static => self.static_auth(username, realm, src_addr),
        }
    }
}

/// Long-term-credential key material: `MD5(username:realm:password)`.
pub fn long_term_key(username: &str, realm: &str, password: &str) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(realm.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}
