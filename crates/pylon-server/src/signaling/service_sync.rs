//! Service catalog sync over the signaling channel.
//!
//! Edges push catalog changes (`service-sync`), replay their full catalog
//! on reconnect (`service-sync-batch`), and fetch the server's view
//! (`service-list-request`). Every single-sync outcome emits exactly one
//! ack; a batch emits exactly one summary ack, or one top-level error when
//! the batch exceeds the cap.

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use pylon_core::db::unix_timestamp;

use crate::storage::{DatabaseError, EdgeService};

use super::hub::{PeerConnection, SignalingHub};
use super::message::SignalingMessage;
use super::validation::validate_service;

pub const TYPE_SERVICE_SYNC: &str = "service-sync";
pub const TYPE_SERVICE_SYNC_ACK: &str = "service-sync-ack";
pub const TYPE_SERVICE_SYNC_BATCH: &str = "service-sync-batch";
pub const TYPE_SERVICE_LIST_REQUEST: &str = "service-list-request";
pub const TYPE_SERVICE_LIST_RESPONSE: &str = "service-list-response";

/// Maximum number of services accepted in one batch sync.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Failures of a single sync operation.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("service not found: {0}")]
    NotFound(DatabaseError),

    #[error("service belongs to different edge")]
    Ownership,

    #[error("failed to create service: {0}")]
    Create(DatabaseError),

    #[error("failed to update service: {0}")]
    Update(DatabaseError),

    #[error("failed to delete service: {0}")]
    Delete(DatabaseError),
}

impl SignalingHub {
    /// `service-sync`: apply one create/update/delete from an edge.
    pub(crate) async fn handle_service_sync(
        &self,
        conn: &std::sync::Arc<PeerConnection>,
        msg: &SignalingMessage,
    ) {
        debug!(edge = %conn.peer.id, "Received service sync message");

        let Some(data) = msg.data.as_ref().and_then(Value::as_object) else {
            error!(edge = %conn.peer.id, "Invalid service sync message data format");
            self.send_sync_ack(conn, "", "", "error", "Invalid message data format")
                .await;
            return;
        };

        let operation = data
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let Some(service_value) = data.get("service").filter(|v| v.is_object()) else {
            error!(edge = %conn.peer.id, operation, "Invalid service data format in sync message");
            self.send_sync_ack(conn, "", "", "error", "Invalid service data format")
                .await;
            return;
        };

        let mut service: EdgeService = match serde_json::from_value(service_value.clone()) {
            Ok(service) => service,
            Err(e) => {
                error!(edge = %conn.peer.id, operation, error = %e, "Failed to parse service data");
                self.send_sync_ack(conn, "", "", "error", &format!("Failed to parse service: {e}"))
                    .await;
                return;
            }
        };

        // The edge cannot speak for another edge.
        service.edge_id = conn.peer.id.clone();

        info!(
            edge = %conn.peer.id,
            operation,
            service_id = %service.id,
            name = %service.name,
            tunnel_port = service.tunnel_port,
            "Processing service sync"
        );

        if let Err(e) = validate_service(&service) {
            warn!(edge = %conn.peer.id, service_id = %service.id, error = %e, "Service validation failed");
            self.send_sync_ack(conn, &service.id, &service.id, "error", &e.to_string())
                .await;
            return;
        }

        let result = match operation {
            "created" => self.create_service(service.clone()).await,
            "updated" => self.update_service(service.clone()).await,
            "deleted" => self.delete_service(&service.id, &conn.peer.id).await,
            _ => {
                warn!(edge = %conn.peer.id, operation, "Invalid service sync operation");
                self.send_sync_ack(conn, &service.id, "", "error", "invalid operation")
                    .await;
                return;
            }
        };

        match result {
            Ok(()) => {
                info!(
                    edge = %conn.peer.id,
                    operation,
                    service_id = %service.id,
                    "Service sync completed successfully"
                );
                self.send_sync_ack(conn, &service.id, &service.id, "success", "")
                    .await;
            }
            Err(e) => {
                error!(
                    edge = %conn.peer.id,
                    operation,
                    service_id = %service.id,
                    error = %e,
                    "Service sync operation failed"
                );
                self.send_sync_ack(conn, &service.id, "", "error", &e.to_string())
                    .await;
            }
        }
    }

    /// `service-sync-batch`: upsert the edge's full catalog on reconnect.
    /// Per-entry failures are logged and skipped; an oversized batch is
    /// refused outright and writes nothing.
    pub(crate) async fn handle_service_sync_batch(
        &self,
        conn: &std::sync::Arc<PeerConnection>,
        msg: &SignalingMessage,
    ) {
        debug!(edge = %conn.peer.id, "Received batch sync message");

        let Some(data) = msg.data.as_ref().and_then(Value::as_object) else {
            error!(edge = %conn.peer.id, "Invalid batch sync message");
            self.send_or_log(conn, &SignalingMessage::error("Invalid batch sync message"))
                .await;
            return;
        };

        let Some(services) = data.get("services").and_then(Value::as_array) else {
            error!(edge = %conn.peer.id, "Invalid services array");
            self.send_or_log(conn, &SignalingMessage::error("Invalid services array"))
                .await;
            return;
        };

        if services.len() > MAX_BATCH_SIZE {
            warn!(
                edge = %conn.peer.id,
                count = services.len(),
                max = MAX_BATCH_SIZE,
                "Batch size exceeds limit"
            );
            self.send_or_log(
                conn,
                &SignalingMessage::error(format!(
                    "Batch size exceeds maximum of {MAX_BATCH_SIZE} services"
                )),
            )
            .await;
            return;
        }

        info!(edge = %conn.peer.id, count = services.len(), "Processing batch sync");

        let mut success_count = 0usize;
        let mut failed_count = 0usize;

        for (index, value) in services.iter().enumerate() {
            let mut service: EdgeService = match serde_json::from_value(value.clone()) {
                Ok(service) => service,
                Err(e) => {
                    warn!(edge = %conn.peer.id, index, error = %e, "Failed to parse service in batch");
                    failed_count += 1;
                    continue;
                }
            };

            service.edge_id = conn.peer.id.clone();

            if let Err(e) = validate_service(&service) {
                warn!(
                    edge = %conn.peer.id,
                    index,
                    service_id = %service.id,
                    error = %e,
                    "Invalid service in batch"
                );
                failed_count += 1;
                continue;
            }

            // Update first; fall back to create only when the record does
            // not exist yet.
            match self.update_service(service.clone()).await {
                Ok(()) => success_count += 1,
                Err(SyncError::NotFound(_)) => match self.create_service(service).await {
                    Ok(()) => success_count += 1,
                    Err(e) => {
                        warn!(edge = %conn.peer.id, index, error = %e, "Failed to sync service");
                        failed_count += 1;
                    }
                },
                Err(e) => {
                    warn!(edge = %conn.peer.id, index, error = %e, "Failed to sync service");
                    failed_count += 1;
                }
            }
        }

        info!(
            edge = %conn.peer.id,
            success = success_count,
            failed = failed_count,
            total = services.len(),
            "Batch sync completed"
        );

        self.send_or_log(
            conn,
            &SignalingMessage::with_data(
                TYPE_SERVICE_SYNC_ACK,
                json!({
                    "status": "success",
                    "message": format!("Synced {success_count} services"),
                }),
            ),
        )
        .await;
    }

    /// `service-list-request`: reply with the edge's stored catalog.
    pub(crate) async fn handle_service_list_request(&self, conn: &std::sync::Arc<PeerConnection>) {
        match self.store().list_edge_services(&conn.peer.id).await {
            Ok(services) => {
                debug!(edge = %conn.peer.id, count = services.len(), "Service list sent");
                self.send_or_log(
                    conn,
                    &SignalingMessage::with_data(
                        TYPE_SERVICE_LIST_RESPONSE,
                        json!({ "services": services }),
                    ),
                )
                .await;
            }
            Err(e) => {
                error!(edge = %conn.peer.id, error = %e, "Failed to list services");
                self.send_or_log(conn, &SignalingMessage::error("Failed to retrieve services"))
                    .await;
            }
        }
    }

    async fn create_service(&self, mut service: EdgeService) -> Result<(), SyncError> {
        let now = unix_timestamp();
        service.created_at = now;
        service.updated_at = now;

        self.store()
            .create_service(&service)
            .await
            .map_err(SyncError::Create)?;

        info!(
            edge = %service.edge_id,
            service_id = %service.id,
            name = %service.name,
            "Service created"
        );
        Ok(())
    }

    async fn update_service(&self, service: EdgeService) -> Result<(), SyncError> {
        let existing = match self.store().get_service(&service.id).await {
            Ok(existing) => existing,
            Err(e @ DatabaseError::NotFound(_)) => return Err(SyncError::NotFound(e)),
            Err(e) => return Err(SyncError::Update(e)),
        };

        if existing.edge_id != service.edge_id {
            return Err(SyncError::Ownership);
        }

        let updated = EdgeService {
            updated_at: unix_timestamp(),
            created_at: existing.created_at,
            ..service
        };

        self.store()
            .update_service(&updated)
            .await
            .map_err(SyncError::Update)?;

        info!(
            edge = %updated.edge_id,
            service_id = %updated.id,
            name = %updated.name,
            "Service updated"
        );
        Ok(())
    }

    async fn delete_service(&self, id: &str, edge_id: &str) -> Result<(), SyncError> {
        let existing = match self.store().get_service(id).await {
            Ok(existing) => existing,
            Err(e @ DatabaseError::NotFound(_)) => return Err(SyncError::NotFound(e)),
            Err(e) => return Err(SyncError::Delete(e)),
        };

        if existing.edge_id != edge_id {
            return Err(SyncError::Ownership);
        }

        self.store()
            .delete_service(id)
            .await
            .map_err(SyncError::Delete)?;

        info!(service_id = %id, "Service deleted");
        Ok(())
    }

    async fn send_sync_ack(
        &self,
        conn: &std::sync::Arc<PeerConnection>,
        local_id: &str,
        server_id: &str,
        status: &str,
        error_msg: &str,
    ) {
        self.send_or_log(
            conn,
            &SignalingMessage::with_data(
                TYPE_SERVICE_SYNC_ACK,
                json!({
                    "localId": local_id,
                    "serverId": server_id,
                    "status": status,
                    "error": error_msg,
                }),
            ),
        )
        .await;
    }
}
