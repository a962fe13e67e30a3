//! Service record validation.

use crate::storage::EdgeService;

/// Field-level validation failures for service records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("service ID is required")]
    MissingId,

    #[error("service ID too long (max 8 characters)")]
    IdTooLong,

    #[error("edge ID is required")]
    MissingEdgeId,

    #[error("service name is required")]
    MissingName,

    #[error("service name too long (max 128 characters)")]
    NameTooLong,

    #[error("service name must contain only alphanumeric, hyphens, underscores, and spaces")]
    NameInvalidChars,

    #[error("local host is required")]
    MissingLocalHost,

    #[error("invalid tunnel port: {0} (must be 1-65535)")]
    InvalidTunnelPort(i64),

    #[error("invalid local port: {0} (must be 1-65535)")]
    InvalidLocalPort(i64),

    #[error("invalid protocol: {0} (must be http or websocket)")]
    InvalidProtocol(String),
}

fn valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == ' ' || c == '-' || c == '_'
}

fn valid_port(port: i64) -> bool {
    (1..=65535).contains(&port)
}

/// Validate a service record against the catalog constraints.
pub fn validate_service(service: &EdgeService) -> Result<(), ValidationError> {
    if service.id.is_empty() {
        return Err(ValidationError::MissingId);
    }
    if service.id.len() > 8 {
        return Err(ValidationError::IdTooLong);
    }

    if service.edge_id.is_empty() {
        return Err(ValidationError::MissingEdgeId);
    }

    if service.name.is_empty() {
        return Err(ValidationError::MissingName);
    }
    if service.name.len() > 128 {
        return Err(ValidationError::NameTooLong);
    }
    if !service.name.chars().all(valid_name_char) {
        return Err(ValidationError::NameInvalidChars);
    }

    if service.local_host.is_empty() {
        return Err(ValidationError::MissingLocalHost);
    }

    if !valid_port(service.tunnel_port) {
        return Err(ValidationError::InvalidTunnelPort(service.tunnel_port));
    }
    if !valid_port(service.local_port) {
        return Err(ValidationError::InvalidLocalPort(service.local_port));
    }

    match service.protocol.as_str() {
        "http" | "websocket" => Ok(()),
        other => Err(ValidationError::InvalidProtocol(other.to_string())),
    }
}
