//! Router tests: auth enforcement, envelope shape, and route contracts.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use pylon_core::config::{SignalingConfig, TurnConfig, TurnPorts};

use crate::apikey;
use crate::registry::{Peer, PeerKind, PeerRegistry};
use crate::signaling::SignalingHub;
use crate::storage::{EdgeService, ServiceStore};
use crate::turn::credentials;
use crate::turn::secrets::SecretRing;

use super::{build_router, AppState};

struct TestApi {
    router: axum::Router,
    state: AppState,
    api_key: String,
}

async fn test_api() -> TestApi {
    let turn_cfg = TurnConfig {
        realm: "test.local".to_string(),
        public_ip: "203.0.113.9".to_string(),
        ports: TurnPorts {
            udp: 3478,
            tcp: 3478,
            tls: 5349,
        },
        ..TurnConfig::default()
    };
    let signaling_cfg = SignalingConfig {
        max_peers_per_room: 10,
        session_timeout: 300,
    };

    let registry = Arc::new(PeerRegistry::new());
    let store = ServiceStore::open_in_memory().await.unwrap();
    let secrets = Arc::new(SecretRing::new("api-secret".to_string(), vec![], 900));
    let hub = Arc::new(SignalingHub::new(
        &signaling_cfg,
        turn_cfg.clone(),
        Arc::clone(&registry),
        store.clone(),
        Arc::clone(&secrets),
    ));

    let state = AppState {
        hub,
        registry,
        store,
        secrets,
        turn: turn_cfg,
    };

    let (api_key, hash) = apikey::generate_with_hash().unwrap();
    let router = build_router(state.clone(), hash, &[]);

    TestApi {
        router,
        state,
        api_key,
    }
}

impl TestApi {
    async fn request(
        &self,
        method: Method,
        uri: &str,
        auth: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = auth {
            builder = builder.header(header::AUTHORIZATION, token);
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

#[tokio::test]
async fn health_is_open_and_ok() {
    let api = test_api().await;
    let (status, body) = api.request(Method::GET, "/api/v1/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert!(body["data"]["time"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn protected_route_requires_authorization_header() {
    let api = test_api().await;
    let (status, body) = api.request(Method::GET, "/api/v1/peers", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["message"], "Missing Authorization header");
}

#[tokio::test]
async fn protected_route_rejects_non_bearer_scheme() {
    let api = test_api().await;
    let (status, body) = api
        .request(Method::GET, "/api/v1/peers", Some("Basic abc"), None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Expected: Bearer"));
}

#[tokio::test]
async fn protected_route_rejects_malformed_key() {
    let api = test_api().await;
    let (status, body) = api
        .request(Method::GET, "/api/v1/peers", Some("Bearer not-a-key"), None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Invalid API key format");
}

#[tokio::test]
async fn protected_route_rejects_wrong_key() {
    let api = test_api().await;
    // Well-formed but not the configured key.
    let other = apikey::generate();
    let (status, body) = api
        .request(
            Method::GET,
            "/api/v1/peers",
            Some(&format!("Bearer {other}")),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Invalid API key");
}

#[tokio::test]
async fn credentials_issue_verifiable_pair() {
    let api = test_api().await;
    let (status, body) = api
        .request(
            Method::POST,
            "/api/v1/credentials",
            Some(&api.bearer()),
            Some(json!({ "peer_type": "edge", "peer_id": "e1", "ttl": 60 })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    let username = data["username"].as_str().unwrap();
    let password = data["password"].as_str().unwrap();
    assert!(username.starts_with("edge:e1:"));
    assert_eq!(data["ttl"], 60);
    assert!(credentials::verify_against(username, password, ["api-secret"]));
}

#[tokio::test]
async fn credentials_default_ttl_comes_from_ring() {
    let api = test_api().await;
    let (status, body) = api
        .request(
            Method::POST,
            "/api/v1/credentials",
            Some(&api.bearer()),
            Some(json!({ "peer_type": "client", "peer_id": "c1" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ttl"], 900);
}

#[tokio::test]
async fn credentials_validate_peer_type() {
    let api = test_api().await;
    let (status, _) = api
        .request(
            Method::POST,
            "/api/v1/credentials",
            Some(&api.bearer()),
            Some(json!({ "peer_type": "relay", "peer_id": "x" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = api
        .request(
            Method::POST,
            "/api/v1/credentials",
            Some(&api.bearer()),
            Some(json!({ "peer_type": "edge" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"]["message"],
        "peer_type and peer_id are required"
    );
}

#[tokio::test]
async fn ice_servers_require_peer_id() {
    let api = test_api().await;
    let (status, _) = api
        .request(Method::GET, "/api/v1/ice-servers", Some(&api.bearer()), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ice_servers_include_stun_turn_and_turns() {
    let api = test_api().await;
    let (status, body) = api
        .request(
            Method::GET,
            "/api/v1/ice-servers?peer_id=c1&peer_type=client",
            Some(&api.bearer()),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let servers = body["data"]["ice_servers"].as_array().unwrap();
    assert_eq!(servers.len(), 3);

    // STUN entry carries no credentials.
    assert!(servers[0].get("username").is_none());
    assert!(servers[0]["urls"][0].as_str().unwrap().starts_with("stun:"));

    // TURN entry advertises both transports and valid credentials.
    let turn_urls = servers[1]["urls"].as_array().unwrap();
    assert_eq!(turn_urls.len(), 2);
    let username = servers[1]["username"].as_str().unwrap();
    let password = servers[1]["credential"].as_str().unwrap();
    assert!(credentials::verify_against(username, password, ["api-secret"]));

    // TURNS entry present because the TLS port is configured.
    assert!(servers[2]["urls"][0]
        .as_str()
        .unwrap()
        .starts_with("turns:"));
}

#[tokio::test]
async fn peers_list_and_filter() {
    let api = test_api().await;
    api.state.registry.admit(Peer::new("e1", PeerKind::Edge)).await;
    api.state
        .registry
        .admit(Peer::new("c1", PeerKind::Client))
        .await;

    let (status, body) = api
        .request(Method::GET, "/api/v1/peers", Some(&api.bearer()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = api
        .request(
            Method::GET,
            "/api/v1/peers?type=edge",
            Some(&api.bearer()),
            None,
        )
        .await;
    let peers = body["data"].as_array().unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["id"], "e1");

    let (status, _) = api
        .request(
            Method::GET,
            "/api/v1/peers?type=router",
            Some(&api.bearer()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_peer_by_id() {
    let api = test_api().await;
    api.state.registry.admit(Peer::new("e1", PeerKind::Edge)).await;

    let (status, body) = api
        .request(Method::GET, "/api/v1/peers/e1", Some(&api.bearer()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "e1");
    assert_eq!(body["data"]["type"], "edge");

    let (status, body) = api
        .request(Method::GET, "/api/v1/peers/ghost", Some(&api.bearer()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "Peer not found");
}

fn stored_service(id: &str, edge_id: &str) -> EdgeService {
    let now = pylon_core::db::unix_timestamp();
    EdgeService {
        id: id.to_string(),
        edge_id: edge_id.to_string(),
        name: "svc".to_string(),
        tunnel_port: 8080,
        local_host: "h".to_string(),
        local_port: 3000,
        protocol: "http".to_string(),
        enabled: true,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn services_list_and_delete() {
    let api = test_api().await;
    api.state
        .store
        .create_service(&stored_service("S1", "E1"))
        .await
        .unwrap();

    let (status, body) = api
        .request(Method::GET, "/api/v1/services", Some(&api.bearer()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = api
        .request(
            Method::DELETE,
            "/api/v1/services/S1",
            Some(&api.bearer()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = api
        .request(
            Method::DELETE,
            "/api/v1/services/S1",
            Some(&api.bearer()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rotate_secrets_updates_the_shared_ring() {
    let api = test_api().await;
    let (status, body) = api
        .request(
            Method::POST,
            "/api/v1/admin/secrets",
            Some(&api.bearer()),
            Some(json!({ "secret": "next", "old_secrets": ["api-secret"] })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let snapshot = api.state.secrets.snapshot();
    assert_eq!(snapshot.current, "next");
    assert_eq!(snapshot.olds, vec!["api-secret".to_string()]);
    // TTL unchanged when the request omits it.
    assert_eq!(snapshot.ttl_secs, 900);
}

#[tokio::test]
async fn rotate_secrets_requires_secret() {
    let api = test_api().await;
    let (status, _) = api
        .request(
            Method::POST,
            "/api/v1/admin/secrets",
            Some(&api.bearer()),
            Some(json!({ "old_secrets": [] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn client_connect_validates_body_and_edge_presence() {
    let api = test_api().await;

    let (status, body) = api
        .request(
            Method::POST,
            "/api/v1/signaling/client/connect",
            None,
            Some(json!({ "id": "C" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"]["message"],
        "id, edge_id, and public_key are required"
    );

    let (status, body) = api
        .request(
            Method::POST,
            "/api/v1/signaling/client/connect",
            None,
            Some(json!({ "id": "C", "edge_id": "E", "public_key": "k" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "Edge E is not online");
}

#[tokio::test]
async fn ws_upgrade_validates_admission_parameters() {
    let api = test_api().await;

    // Plain GET without upgrade headers on a bad type must fail the
    // parameter check before any upgrade handling.
    let (status, body) = api
        .request(Method::GET, "/api/v1/signaling/ws/router?id=x", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "type must be 'edge' or 'client'");

    let (status, body) = api
        .request(Method::GET, "/api/v1/signaling/ws/edge", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "missing id parameter");

    let (status, body) = api
        .request(Method::GET, "/api/v1/signaling/ws/client?id=c1", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"]["message"],
        "missing edgeid parameter for client"
    );
}
