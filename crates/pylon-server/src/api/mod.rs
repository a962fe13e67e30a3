//! REST API surface.
//!
//! All routes live under `/api/v1`. `health` and the signaling endpoints
//! are open (channel admission validates its own parameters); everything
//! else requires a bearer API key.

pub mod handlers;
pub mod middleware;
pub mod response;

#[cfg(test)]
mod handlers_tests;

use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use handlers::AppState;

/// Build the complete router.
pub fn build_router(state: AppState, api_key_hash: String, cors_origins: &[String]) -> Router {
    let protected = Router::new()
        .route("/credentials", post(handlers::generate_credentials))
        .route("/ice-servers", get(handlers::ice_servers))
        .route("/peers", get(handlers::list_peers))
        .route("/peers/:id", get(handlers::get_peer))
        .route("/services", get(handlers::list_services))
        .route("/services/:id", delete(handlers::delete_service))
        .route("/admin/secrets", post(handlers::rotate_secrets))
        .route_layer(from_fn_with_state(api_key_hash, middleware::require_api_key));

    let signaling = Router::new()
        .route("/signaling/ws/:type", get(handlers::ws_upgrade))
        .route("/signaling/client/connect", post(handlers::client_connect));

    let api_v1 = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .merge(signaling);

    let mut router = Router::new()
        .nest("/api/v1", api_v1)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if !cors_origins.is_empty() {
        let origins: Vec<HeaderValue> = cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        let cors = CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([ORIGIN, CONTENT_TYPE, ACCEPT, AUTHORIZATION]);
        router = router.layer(cors);
    }

    router
}
