//! Database queries for the service catalog.

use super::models::EdgeService;
use super::{DatabaseError, ServiceStore};

impl ServiceStore {
    /// Create a new service record. Fails if the id already exists.
    pub async fn create_service(&self, service: &EdgeService) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO edge_services \
             (id, edge_id, name, tunnel_port, local_host, local_port, protocol, enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&service.id)
        .bind(&service.edge_id)
        .bind(&service.name)
        .bind(service.tunnel_port)
        .bind(&service.local_host)
        .bind(service.local_port)
        .bind(&service.protocol)
        .bind(service.enabled)
        .bind(service.created_at)
        .bind(service.updated_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Update an existing service record.
    pub async fn update_service(&self, service: &EdgeService) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE edge_services \
             SET name = ?, tunnel_port = ?, local_host = ?, local_port = ?, protocol = ?, enabled = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&service.name)
        .bind(service.tunnel_port)
        .bind(&service.local_host)
        .bind(service.local_port)
        .bind(&service.protocol)
        .bind(service.enabled)
        .bind(service.updated_at)
        .bind(&service.id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Service {}", service.id)));
        }

        Ok(())
    }

    /// Delete a service by id.
    pub async fn delete_service(&self, id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM edge_services WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Service {id}")));
        }

        Ok(())
    }

    /// Get a service by id.
    pub async fn get_service(&self, id: &str) -> Result<EdgeService, DatabaseError> {
        sqlx::query_as::<_, EdgeService>("SELECT * FROM edge_services WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Service {id}")))
    }

    /// List all services owned by an edge, newest first.
    pub async fn list_edge_services(
        &self,
        edge_id: &str,
    ) -> Result<Vec<EdgeService>, DatabaseError> {
        let services = sqlx::query_as::<_, EdgeService>(
            "SELECT * FROM edge_services WHERE edge_id = ? ORDER BY created_at DESC",
        )
        .bind(edge_id)
        .fetch_all(self.pool())
        .await?;

        Ok(services)
    }

    /// List all enabled services across every edge.
    pub async fn list_enabled_services(&self) -> Result<Vec<EdgeService>, DatabaseError> {
        let services = sqlx::query_as::<_, EdgeService>(
            "SELECT * FROM edge_services WHERE enabled = 1 ORDER BY edge_id, created_at DESC",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(services)
    }

    /// List every service regardless of status.
    pub async fn list_all_services(&self) -> Result<Vec<EdgeService>, DatabaseError> {
        let services = sqlx::query_as::<_, EdgeService>(
            "SELECT * FROM edge_services ORDER BY edge_id, created_at DESC",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(services)
    }
}
