//! TURN REST credential codec.
//!
//! Credentials follow the coturn REST convention: the username is
//! `<peer_type>:<peer_id>:<unix_expiry>` and the password is the
//! standard-base64 HMAC-SHA256 of the username under a shared secret.
//! The codec is stateless; expiry policy is enforced by callers via
//! [`check_expiry`].

use base64::engine::general_purpose::STANDARD as BASE64_STD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum distance a credential expiry may lie in the future. Bounds the
/// replay window for forged expiries.
pub const MAX_EXPIRY_AHEAD_SECS: u64 = 48 * 60 * 60;

/// Credential parse and policy errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("invalid username format (expected peerType:peerID:expiry)")]
    Format,

    #[error("credential expired")]
    Expired,

    #[error("credential expiry too far in the future")]
    TooFarFuture,
}

/// A freshly issued credential.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub username: String,
    pub password: String,
    pub expires_at: u64,
}

/// The components of a parsed credential username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCredential {
    pub peer_type: String,
    pub peer_id: String,
    pub expires_at: u64,
}

/// Issue a credential expiring `ttl_secs` from now.
pub fn issue(peer_type: &str, peer_id: &str, ttl_secs: u64, secret: &str) -> IssuedCredential {
    issue_at(
        peer_type,
        peer_id,
        ttl_secs,
        secret,
        pylon_core::db::unix_timestamp().max(0) as u64,
    )
}

/// Issue a credential relative to an explicit clock. Deterministic for
/// identical inputs.
pub fn issue_at(
    peer_type: &str,
    peer_id: &str,
    ttl_secs: u64,
    secret: &str,
    now: u64,
) -> IssuedCredential {
    let expires_at = now + ttl_secs;
    let username = format!("{peer_type}:{peer_id}:{expires_at}");
    let password = compute_password(secret, &username);
    IssuedCredential {
        username,
        password,
        expires_at,
    }
}

/// Expected password for a username under a secret:
/// `base64(HMAC-SHA256(secret, username))`.
pub fn compute_password(secret: &str, username: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(username.as_bytes());
    BASE64_STD.encode(mac.finalize().into_bytes())
}

/// Parse a credential username into its components.
///
/// Rejects anything that is not exactly three `:`-separated parts with a
/// non-negative integer expiry.
pub fn parse(username: &str) -> Result<ParsedCredential, CredentialError> {
    let mut parts = username.splitn(3, ':');
    let (Some(peer_type), Some(peer_id), Some(expiry)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(CredentialError::Format);
    };

    let expires_at: u64 = expiry.parse().map_err(|_| CredentialError::Format)?;

    Ok(ParsedCredential {
        peer_type: peer_type.to_string(),
        peer_id: peer_id.to_string(),
        expires_at,
    })
}

/// Enforce the expiry policy at validation time: the credential must not
/// have expired and must not claim an expiry more than 48 hours out.
pub fn check_expiry(expires_at: u64, now: u64) -> Result<(), CredentialError> {
    if expires_at <= now {
        return Err(CredentialError::Expired);
    }
    if expires_at > now + MAX_EXPIRY_AHEAD_SECS {
        return Err(CredentialError::TooFarFuture);
    }
    Ok(())
}

/// Verify a presented password against each non-empty secret in order,
/// returning true on the first constant-time match.
pub fn verify_against<'a, I>(username: &str, password: &str, secrets: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    for secret in secrets {
        if secret.is_empty() {
            continue;
        }
        let expected = compute_password(secret, username);
        if bool::from(expected.as_bytes().ct_eq(password.as_bytes())) {
            return true;
        }
    }
    false
}
