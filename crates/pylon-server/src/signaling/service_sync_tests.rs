//! Service sync handler tests: ownership enforcement, ack discipline,
//! batch upserts, and the batch cap.

use serde_json::{json, Value};

use crate::registry::PeerKind;

use super::hub_tests::{admit_peer, recv_msg, test_hub};
use super::message::SignalingMessage;
use super::service_sync::{
    MAX_BATCH_SIZE, TYPE_SERVICE_LIST_REQUEST, TYPE_SERVICE_LIST_RESPONSE, TYPE_SERVICE_SYNC,
    TYPE_SERVICE_SYNC_ACK, TYPE_SERVICE_SYNC_BATCH,
};

fn service_json(id: &str) -> Value {
    json!({
        "id": id,
        "name": "ok",
        "tunnel_port": 8080,
        "local_host": "h",
        "local_port": 3000,
        "protocol": "http",
        "enabled": true,
    })
}

fn sync_msg(operation: &str, service: Value) -> SignalingMessage {
    SignalingMessage::with_data(
        TYPE_SERVICE_SYNC,
        json!({ "operation": operation, "service": service }),
    )
}

fn batch_msg(services: Vec<Value>) -> SignalingMessage {
    SignalingMessage::with_data(TYPE_SERVICE_SYNC_BATCH, json!({ "services": services }))
}

#[tokio::test]
async fn create_binds_service_to_connection_edge() {
    let hub = test_hub().await;
    let (edge, mut rx) = admit_peer(&hub, "E1", PeerKind::Edge).await;

    // The payload claims another owner; the handler must rebind it.
    let mut svc = service_json("S1");
    svc["edge_id"] = json!("intruder");
    hub.handle_message(&edge, sync_msg("created", svc)).await;

    let ack = recv_msg(&mut rx).await;
    assert_eq!(ack.kind, TYPE_SERVICE_SYNC_ACK);
    let data = ack.data.unwrap();
    assert_eq!(data["status"], "success");
    assert_eq!(data["localId"], "S1");
    assert_eq!(data["serverId"], "S1");

    let stored = hub.store().get_service("S1").await.unwrap();
    assert_eq!(stored.edge_id, "E1");
    assert!(stored.created_at > 0);
}

#[tokio::test]
async fn update_by_owner_succeeds() {
    let hub = test_hub().await;
    let (edge, mut rx) = admit_peer(&hub, "E1", PeerKind::Edge).await;

    hub.handle_message(&edge, sync_msg("created", service_json("S1")))
        .await;
    recv_msg(&mut rx).await;

    let mut updated = service_json("S1");
    updated["name"] = json!("renamed");
    hub.handle_message(&edge, sync_msg("updated", updated)).await;

    let ack = recv_msg(&mut rx).await;
    assert_eq!(ack.data.unwrap()["status"], "success");
    assert_eq!(hub.store().get_service("S1").await.unwrap().name, "renamed");
}

#[tokio::test]
async fn update_by_other_edge_is_refused() {
    let hub = test_hub().await;
    let (e1, mut rx1) = admit_peer(&hub, "E1", PeerKind::Edge).await;
    let (e2, mut rx2) = admit_peer(&hub, "E2", PeerKind::Edge).await;

    hub.handle_message(&e1, sync_msg("created", service_json("S1")))
        .await;
    recv_msg(&mut rx1).await;

    let mut hijack = service_json("S1");
    hijack["name"] = json!("stolen");
    hub.handle_message(&e2, sync_msg("updated", hijack)).await;

    let ack = recv_msg(&mut rx2).await;
    let data = ack.data.unwrap();
    assert_eq!(data["status"], "error");
    assert_eq!(data["error"], "service belongs to different edge");

    // Store unchanged.
    let stored = hub.store().get_service("S1").await.unwrap();
    assert_eq!(stored.edge_id, "E1");
    assert_eq!(stored.name, "ok");
}

#[tokio::test]
async fn delete_by_other_edge_is_refused() {
    let hub = test_hub().await;
    let (e1, mut rx1) = admit_peer(&hub, "E1", PeerKind::Edge).await;
    let (e2, mut rx2) = admit_peer(&hub, "E2", PeerKind::Edge).await;

    hub.handle_message(&e1, sync_msg("created", service_json("S1")))
        .await;
    recv_msg(&mut rx1).await;

    hub.handle_message(&e2, sync_msg("deleted", service_json("S1")))
        .await;

    let ack = recv_msg(&mut rx2).await;
    assert_eq!(ack.data.unwrap()["status"], "error");
    assert!(hub.store().get_service("S1").await.is_ok());
}

#[tokio::test]
async fn delete_by_owner_removes_service() {
    let hub = test_hub().await;
    let (edge, mut rx) = admit_peer(&hub, "E1", PeerKind::Edge).await;

    hub.handle_message(&edge, sync_msg("created", service_json("S1")))
        .await;
    recv_msg(&mut rx).await;

    hub.handle_message(&edge, sync_msg("deleted", service_json("S1")))
        .await;
    let ack = recv_msg(&mut rx).await;
    assert_eq!(ack.data.unwrap()["status"], "success");
    assert!(hub.store().get_service("S1").await.is_err());
}

#[tokio::test]
async fn update_of_missing_service_errors() {
    let hub = test_hub().await;
    let (edge, mut rx) = admit_peer(&hub, "E1", PeerKind::Edge).await;

    hub.handle_message(&edge, sync_msg("updated", service_json("ghost")))
        .await;

    let ack = recv_msg(&mut rx).await;
    let data = ack.data.unwrap();
    assert_eq!(data["status"], "error");
    assert!(data["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn unknown_operation_gets_error_ack() {
    let hub = test_hub().await;
    let (edge, mut rx) = admit_peer(&hub, "E1", PeerKind::Edge).await;

    hub.handle_message(&edge, sync_msg("upserted", service_json("S1")))
        .await;

    let ack = recv_msg(&mut rx).await;
    let data = ack.data.unwrap();
    assert_eq!(data["status"], "error");
    assert_eq!(data["error"], "invalid operation");
}

#[tokio::test]
async fn validation_failure_gets_error_ack_and_writes_nothing() {
    let hub = test_hub().await;
    let (edge, mut rx) = admit_peer(&hub, "E1", PeerKind::Edge).await;

    let mut bad = service_json("S1");
    bad["tunnel_port"] = json!(70000);
    hub.handle_message(&edge, sync_msg("created", bad)).await;

    let ack = recv_msg(&mut rx).await;
    let data = ack.data.unwrap();
    assert_eq!(data["status"], "error");
    assert!(data["error"].as_str().unwrap().contains("tunnel port"));
    assert!(hub.store().get_service("S1").await.is_err());
}

#[tokio::test]
async fn malformed_sync_payload_gets_error_ack() {
    let hub = test_hub().await;
    let (edge, mut rx) = admit_peer(&hub, "E1", PeerKind::Edge).await;

    let msg = SignalingMessage::with_data(TYPE_SERVICE_SYNC, json!("not an object"));
    hub.handle_message(&edge, msg).await;

    let ack = recv_msg(&mut rx).await;
    assert_eq!(ack.kind, TYPE_SERVICE_SYNC_ACK);
    assert_eq!(ack.data.unwrap()["status"], "error");
}

#[tokio::test]
async fn batch_upserts_and_counts_successes() {
    let hub = test_hub().await;
    let (edge, mut rx) = admit_peer(&hub, "E1", PeerKind::Edge).await;

    // Pre-existing service: the batch entry becomes an update.
    hub.handle_message(&edge, sync_msg("created", service_json("S1")))
        .await;
    recv_msg(&mut rx).await;

    let mut updated = service_json("S1");
    updated["name"] = json!("renamed");
    hub.handle_message(&edge, batch_msg(vec![updated, service_json("S2")]))
        .await;

    let ack = recv_msg(&mut rx).await;
    assert_eq!(ack.kind, TYPE_SERVICE_SYNC_ACK);
    let data = ack.data.unwrap();
    assert_eq!(data["status"], "success");
    assert_eq!(data["message"], "Synced 2 services");

    assert_eq!(hub.store().get_service("S1").await.unwrap().name, "renamed");
    assert_eq!(hub.store().get_service("S2").await.unwrap().edge_id, "E1");
}

#[tokio::test]
async fn batch_skips_invalid_entries() {
    let hub = test_hub().await;
    let (edge, mut rx) = admit_peer(&hub, "E1", PeerKind::Edge).await;

    let mut bad = service_json("S2");
    bad["protocol"] = json!("carrier-pigeon");
    hub.handle_message(&edge, batch_msg(vec![service_json("S1"), bad, json!(42)]))
        .await;

    let ack = recv_msg(&mut rx).await;
    assert_eq!(ack.data.unwrap()["message"], "Synced 1 services");

    assert!(hub.store().get_service("S1").await.is_ok());
    assert!(hub.store().get_service("S2").await.is_err());
}

#[tokio::test]
async fn oversized_batch_is_refused_outright() {
    let hub = test_hub().await;
    let (edge, mut rx) = admit_peer(&hub, "E1", PeerKind::Edge).await;

    let services: Vec<Value> = (0..=MAX_BATCH_SIZE)
        .map(|i| service_json(&format!("s{i}")))
        .collect();
    assert_eq!(services.len(), MAX_BATCH_SIZE + 1);

    hub.handle_message(&edge, batch_msg(services)).await;

    // Exactly one top-level error, no ack.
    let reply = recv_msg(&mut rx).await;
    assert_eq!(reply.kind, "error");
    assert!(reply.data.unwrap()["error"]
        .as_str()
        .unwrap()
        .contains("Batch size exceeds maximum"));
    assert!(rx.try_recv().is_err());

    // Nothing was written.
    assert!(hub.store().list_all_services().await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_does_not_cross_edge_ownership() {
    let hub = test_hub().await;
    let (e1, mut rx1) = admit_peer(&hub, "E1", PeerKind::Edge).await;
    let (e2, mut rx2) = admit_peer(&hub, "E2", PeerKind::Edge).await;

    hub.handle_message(&e1, sync_msg("created", service_json("S1")))
        .await;
    recv_msg(&mut rx1).await;

    // E2 replays a catalog containing E1's service id: the update is
    // refused by ownership and no create fallback happens.
    hub.handle_message(&e2, batch_msg(vec![service_json("S1")]))
        .await;

    let ack = recv_msg(&mut rx2).await;
    assert_eq!(ack.data.unwrap()["message"], "Synced 0 services");
    assert_eq!(hub.store().get_service("S1").await.unwrap().edge_id, "E1");
}

#[tokio::test]
async fn service_list_request_returns_edge_catalog() {
    let hub = test_hub().await;
    let (e1, mut rx1) = admit_peer(&hub, "E1", PeerKind::Edge).await;
    let (e2, mut rx2) = admit_peer(&hub, "E2", PeerKind::Edge).await;

    hub.handle_message(&e1, sync_msg("created", service_json("S1")))
        .await;
    recv_msg(&mut rx1).await;
    hub.handle_message(&e2, sync_msg("created", service_json("S2")))
        .await;
    recv_msg(&mut rx2).await;

    hub.handle_message(&e1, SignalingMessage::new(TYPE_SERVICE_LIST_REQUEST))
        .await;

    let reply = recv_msg(&mut rx1).await;
    assert_eq!(reply.kind, TYPE_SERVICE_LIST_RESPONSE);
    let services = reply.data.unwrap()["services"].clone();
    let services = services.as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["id"], "S1");
}
