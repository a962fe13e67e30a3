//! API key generation and Argon2id digest validation.
//!
//! Keys have the form `arq_<base64url(32 random bytes)>`. Only an Argon2id
//! digest is persisted, stored as `base64(salt):base64(hash)` with the raw
//! (unpadded) standard alphabet.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Prefix for all API keys.
pub const KEY_PREFIX: &str = "arq_";

/// Number of random bytes in a key (256 bits).
pub const KEY_LENGTH: usize = 32;

// Argon2id parameters. Chosen for interactive verification (~100 ms).
const ARGON2_TIME: u32 = 3;
const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_LANES: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32;
const SALT_LENGTH: usize = 16;

/// Length of the base64url-encoded key body (32 bytes, unpadded).
const ENCODED_KEY_LENGTH: usize = 43;

/// API key errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiKeyError {
    #[error("Hashing error: {0}")]
    Hash(String),
}

fn hasher() -> Result<Argon2<'static>, ApiKeyError> {
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_TIME,
        ARGON2_LANES,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|e| ApiKeyError::Hash(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Generate a new API key: `arq_<base64url(32 random bytes)>`.
pub fn generate() -> String {
    let mut bytes = [0u8; KEY_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    format!("{KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Create an Argon2id digest of the API key in `base64(salt):base64(hash)`
/// form.
pub fn hash(api_key: &str) -> Result<String, ApiKeyError> {
    let mut salt = [0u8; SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);

    let mut out = [0u8; ARGON2_OUTPUT_LEN];
    hasher()?
        .hash_password_into(api_key.as_bytes(), &salt, &mut out)
        .map_err(|e| ApiKeyError::Hash(e.to_string()))?;

    Ok(format!(
        "{}:{}",
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(out)
    ))
}

/// Check the provided key against a stored digest in constant time.
///
/// Any malformed digest fails closed.
pub fn validate(api_key: &str, encoded_hash: &str) -> bool {
    let Some((salt_b64, hash_b64)) = encoded_hash.split_once(':') else {
        return false;
    };
    let Ok(salt) = STANDARD_NO_PAD.decode(salt_b64) else {
        return false;
    };
    let Ok(stored) = STANDARD_NO_PAD.decode(hash_b64) else {
        return false;
    };
    if stored.len() != ARGON2_OUTPUT_LEN {
        return false;
    }

    let Ok(argon2) = hasher() else {
        return false;
    };
    let mut computed = [0u8; ARGON2_OUTPUT_LEN];
    if argon2
        .hash_password_into(api_key.as_bytes(), &salt, &mut computed)
        .is_err()
    {
        return false;
    }

    computed.ct_eq(&stored[..]).into()
}

/// Check that a key has the expected shape without touching the digest:
/// correct prefix and a base64url body decoding to exactly 32 bytes.
pub fn validate_format(api_key: &str) -> bool {
    let Some(encoded) = api_key.strip_prefix(KEY_PREFIX) else {
        return false;
    };
    if encoded.len() != ENCODED_KEY_LENGTH {
        return false;
    }
    match URL_SAFE_NO_PAD.decode(encoded) {
        Ok(decoded) => decoded.len() == KEY_LENGTH,
        Err(_) => false,
    }
}

/// Generate a new API key together with its digest.
pub fn generate_with_hash() -> Result<(String, String), ApiKeyError> {
    let key = generate();
    let digest = hash(&key)?;
    Ok((key, digest))
}

/// Current timestamp in RFC 3339 form, recorded next to the digest.
pub fn created_at() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
