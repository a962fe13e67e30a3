//! TLS configuration for the server listeners.
//!
//! Certificates are read from the configured cert directory
//! (`server.pem` + `server-key.pem`). Acquiring and renewing them (ACME
//! or otherwise) is an external concern; this module only turns whatever
//! is on disk into a `rustls::ServerConfig` shared by the TLS-capable
//! listeners.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::info;

/// Filenames expected inside the cert directory.
pub const CERT_FILE: &str = "server.pem";
pub const KEY_FILE: &str = "server-key.pem";

/// TLS mode for the server listeners.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// No certificates available; TLS listeners stay disabled.
    Disabled,
    /// Certificate and key files from the cert directory.
    CertDir {
        cert_path: PathBuf,
        key_path: PathBuf,
    },
}

impl TlsMode {
    /// Probe a cert directory: enabled only when both files exist.
    pub fn from_cert_dir(cert_dir: &Path) -> Self {
        let cert_path = cert_dir.join(CERT_FILE);
        let key_path = cert_dir.join(KEY_FILE);
        if cert_path.is_file() && key_path.is_file() {
            Self::CertDir {
                cert_path,
                key_path,
            }
        } else {
            Self::Disabled
        }
    }

    /// Build a `rustls::ServerConfig` from this mode.
    ///
    /// Returns `None` if TLS is disabled.
    pub fn server_config(&self) -> Result<Option<Arc<rustls::ServerConfig>>, TlsConfigError> {
        match self {
            TlsMode::Disabled => Ok(None),
            TlsMode::CertDir {
                cert_path,
                key_path,
            } => {
                let certs = load_certs(cert_path)?;
                let key = load_key(key_path)?;

                let config = rustls::ServerConfig::builder()
                    .with_no_client_auth()
                    .with_single_cert(certs, key)
                    .map_err(|e| TlsConfigError::InvalidMaterial(e.to_string()))?;

                info!(
                    cert = %cert_path.display(),
                    key = %key_path.display(),
                    "TLS certificates loaded"
                );
                Ok(Some(Arc::new(config)))
            }
        }
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let pem = std::fs::read(path).map_err(|e| {
        TlsConfigError::FileRead(format!("Failed to read cert {}: {}", path.display(), e))
    })?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| TlsConfigError::InvalidMaterial(e.to_string()))?;
    if certs.is_empty() {
        return Err(TlsConfigError::InvalidMaterial(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsConfigError> {
    let pem = std::fs::read(path).map_err(|e| {
        TlsConfigError::FileRead(format!("Failed to read key {}: {}", path.display(), e))
    })?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| TlsConfigError::InvalidMaterial(e.to_string()))?
        .ok_or_else(|| {
            TlsConfigError::InvalidMaterial(format!("no private key found in {}", path.display()))
        })
}

/// TLS configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("File read error: {0}")]
    FileRead(String),

    #[error("Invalid TLS material: {0}")]
    InvalidMaterial(String),
}
