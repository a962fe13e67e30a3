//! Standard JSON response envelope.
//!
//! Every route answers `{success, data?, error?, meta?}`; errors carry
//! `{code, message, detail?}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u32,
    #[serde(rename = "perPage")]
    pub per_page: u32,
    pub total: u64,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
}

/// Optional response metadata.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiResponseMeta {
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

/// Structured API error.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// The response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ApiResponseMeta>,
}

/// 200 envelope around serialized `data`.
pub fn success(data: impl Serialize) -> Response {
    match serde_json::to_value(data) {
        Ok(value) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: Some(value),
                error: None,
                meta: None,
            }),
        )
            .into_response(),
        Err(e) => internal_error(format!("Failed to encode response: {e}")),
    }
}

/// Error envelope with the given status.
pub fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code: status.as_u16(),
                message: message.into(),
                detail: None,
            }),
            meta: None,
        }),
    )
        .into_response()
}

pub fn bad_request(message: impl Into<String>) -> Response {
    error(StatusCode::BAD_REQUEST, message)
}

pub fn unauthorized(message: impl Into<String>) -> Response {
    error(StatusCode::UNAUTHORIZED, message)
}

pub fn not_found(message: impl Into<String>) -> Response {
    error(StatusCode::NOT_FOUND, message)
}

pub fn internal_error(message: impl Into<String>) -> Response {
    error(StatusCode::INTERNAL_SERVER_ERROR, message)
}
