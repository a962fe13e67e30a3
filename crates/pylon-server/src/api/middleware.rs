//! Bearer API key authentication middleware.
//!
//! Protected routes require `Authorization: Bearer arq_<key>`; the key is
//! checked against the persisted Argon2id digest. Failures answer 401
//! with the standard envelope.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::apikey;

use super::response;

/// Validate the bearer key against the configured digest.
pub async fn require_api_key(
    State(api_key_hash): State<String>,
    req: Request,
    next: Next,
) -> Response {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(header) = header else {
        return response::unauthorized("Missing Authorization header");
    };

    let Some(key) = header.strip_prefix("Bearer ") else {
        return response::unauthorized(
            "Invalid Authorization header format. Expected: Bearer <api_key>",
        );
    };

    if !apikey::validate_format(key) {
        warn!("Rejected API key with invalid format");
        return response::unauthorized("Invalid API key format");
    }

    if !apikey::validate(key, &api_key_hash) {
        warn!("Rejected invalid API key");
        return response::unauthorized("Invalid API key");
    }

    next.run(req).await
}
