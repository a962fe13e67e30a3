//! Server configuration.
//!
//! The configuration lives in a single YAML file. Loading applies defaults
//! for optional fields and validates the result; the `apikey` CLI rewrites
//! the file in place (mode 0600) when the API key digest changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub cert_dir: PathBuf,

    #[serde(default)]
    pub acme: AcmeConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// ACME / certificate acquisition configuration (external boundary).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcmeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ca_url: String,
    #[serde(default)]
    pub challenge: String,
    #[serde(default)]
    pub dns_provider: String,
    #[serde(default)]
    pub dns_config: HashMap<String, String>,
}

/// TURN/STUN server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnConfig {
    #[serde(default)]
    pub realm: String,
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub ports: TurnPorts,
    #[serde(default)]
    pub relay_port_range: PortRange,
    #[serde(default)]
    pub auth: TurnAuthConfig,
}

/// TURN listener ports. A zero port disables that listener.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TurnPorts {
    #[serde(default)]
    pub udp: u16,
    #[serde(default)]
    pub tcp: u16,
    #[serde(default)]
    pub tls: u16,
}

/// Inclusive port range used for relay allocations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PortRange {
    #[serde(default)]
    pub min: u16,
    #[serde(default)]
    pub max: u16,
}

/// TURN authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnAuthConfig {
    /// Either `rest` (HMAC credentials) or `static` (fixed user table).
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub old_secrets: Vec<String>,
    #[serde(default)]
    pub ttl_seconds: u64,
    #[serde(default)]
    pub static_users: Vec<StaticUser>,
}

/// A static username/password pair for `static` auth mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticUser {
    pub username: String,
    pub password: String,
}

/// WebRTC signaling configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SignalingConfig {
    #[serde(default)]
    pub max_peers_per_room: u32,
    /// Seconds without liveness evidence before a peer is evicted.
    #[serde(default)]
    pub session_timeout: u64,
}

impl SignalingConfig {
    /// Session timeout as a [`Duration`].
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }
}

/// Durable storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite service catalog. Defaults to `data/services.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("data").join("services.db"))
    }
}

/// REST API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub api_key: ApiKeyConfig,
}

/// Persisted API key digest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub created_at: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    #[serde(default)]
    pub level: String,
    /// Either `text` or `json`.
    #[serde(default)]
    pub format: String,
}

impl Config {
    /// Load configuration from a YAML file, apply defaults, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = Self::load_unchecked(path)?;
        cfg.apply_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration without validation (used by the apikey CLI,
    /// which must read partially-configured files).
    pub fn load_unchecked(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Write the configuration back to disk with owner-only permissions.
    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        restrict_permissions(path)?;
        Ok(())
    }

    /// Template configuration written by `apikey generate` when no config
    /// file exists yet.
    pub fn default_template() -> Self {
        let mut cfg = Self {
            domain: "turn.example.com".to_string(),
            email: "admin@example.com".to_string(),
            turn: TurnConfig {
                realm: "example.com".to_string(),
                public_ip: "127.0.0.1".to_string(),
                auth: TurnAuthConfig {
                    mode: "rest".to_string(),
                    secret: "change-this-secret-in-production".to_string(),
                    ..TurnAuthConfig::default()
                },
                ..TurnConfig::default()
            },
            ..Self::default()
        };
        cfg.apply_defaults();
        cfg
    }

    /// Fill in defaults for optional fields left unset by the file.
    pub fn apply_defaults(&mut self) {
        if self.cert_dir.as_os_str().is_empty() {
            self.cert_dir = PathBuf::from("./certs");
        }

        if self.acme.enabled {
            if self.acme.ca_url.is_empty() {
                self.acme.ca_url = "https://acme-v02.api.letsencrypt.org/directory".to_string();
            }
            if self.acme.challenge.is_empty() {
                self.acme.challenge = "http-01".to_string();
            }
        }

        if self.turn.realm.is_empty() {
            self.turn.realm = self.domain.clone();
        }
        if self.turn.ports.udp == 0 {
            self.turn.ports.udp = 3478;
        }
        if self.turn.ports.tcp == 0 {
            self.turn.ports.tcp = 3478;
        }
        if self.turn.ports.tls == 0 {
            self.turn.ports.tls = 5349;
        }
        if self.turn.relay_port_range.min == 0 {
            self.turn.relay_port_range.min = 49152;
        }
        if self.turn.relay_port_range.max == 0 {
            self.turn.relay_port_range.max = 65535;
        }
        if self.turn.auth.ttl_seconds == 0 {
            self.turn.auth.ttl_seconds = 86400;
        }

        if self.signaling.max_peers_per_room == 0 {
            self.signaling.max_peers_per_room = 10;
        }
        if self.signaling.session_timeout == 0 {
            self.signaling.session_timeout = 300;
        }

        if self.api.port == 0 {
            self.api.port = 9000;
        }

        if self.logging.level.is_empty() {
            self.logging.level = "info".to_string();
        }
        if self.logging.format.is_empty() {
            self.logging.format = "text".to_string();
        }
    }

    /// Check the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.domain.is_empty() {
            return Err(Error::Config("domain is required".to_string()));
        }

        if self.acme.enabled {
            if self.email.is_empty() {
                return Err(Error::Config(
                    "email is required when ACME is enabled".to_string(),
                ));
            }
            match self.acme.challenge.as_str() {
                "http-01" | "tls-alpn-01" | "dns-01" => {}
                other => {
                    return Err(Error::Config(format!(
                        "invalid ACME challenge type: {other}"
                    )));
                }
            }
            if self.acme.challenge == "dns-01" && self.acme.dns_provider.is_empty() {
                return Err(Error::Config(
                    "dns_provider is required for dns-01 challenge".to_string(),
                ));
            }
        }

        match self.turn.auth.mode.as_str() {
            "rest" => {
                if self.turn.auth.secret.is_empty() {
                    return Err(Error::Config(
                        "auth secret is required for REST mode".to_string(),
                    ));
                }
            }
            "static" => {
                if self.turn.auth.static_users.is_empty() {
                    return Err(Error::Config(
                        "at least one static user is required for static auth mode".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::Config(format!(
                    "invalid auth mode: {other} (must be 'rest' or 'static')"
                )));
            }
        }

        Ok(())
    }
}

/// Rewrite the persisted API key digest in the config file.
pub fn set_api_key(path: &Path, hash: &str, created_at: &str) -> Result<()> {
    let mut cfg = Config::load_unchecked(path)?;
    cfg.api.api_key.hash = hash.to_string();
    cfg.api.api_key.created_at = created_at.to_string();
    cfg.save(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        let mut cfg = Config {
            domain: "turn.example.com".to_string(),
            ..Config::default()
        };
        cfg.turn.auth.mode = "rest".to_string();
        cfg.turn.auth.secret = "s3cret".to_string();
        cfg.apply_defaults();
        cfg
    }

    #[test]
    fn defaults_fill_ports_and_timeouts() {
        let cfg = minimal();
        assert_eq!(cfg.turn.ports.udp, 3478);
        assert_eq!(cfg.turn.ports.tls, 5349);
        assert_eq!(cfg.turn.relay_port_range.min, 49152);
        assert_eq!(cfg.turn.auth.ttl_seconds, 86400);
        assert_eq!(cfg.signaling.session_timeout, 300);
        assert_eq!(cfg.api.port, 9000);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn realm_defaults_to_domain() {
        let cfg = minimal();
        assert_eq!(cfg.turn.realm, "turn.example.com");
    }

    #[test]
    fn validate_requires_domain() {
        let mut cfg = minimal();
        cfg.domain.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_auth_mode() {
        let mut cfg = minimal();
        cfg.turn.auth.mode = "oauth".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rest_mode_requires_secret() {
        let mut cfg = minimal();
        cfg.turn.auth.secret.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_static_mode_requires_users() {
        let mut cfg = minimal();
        cfg.turn.auth.mode = "static".to_string();
        assert!(cfg.validate().is_err());

        cfg.turn.auth.static_users.push(StaticUser {
            username: "alice".to_string(),
            password: "pw".to_string(),
        });
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_acme_dns_challenge_requires_provider() {
        let mut cfg = minimal();
        cfg.acme.enabled = true;
        cfg.email = "ops@example.com".to_string();
        cfg.acme.challenge = "dns-01".to_string();
        assert!(cfg.validate().is_err());

        cfg.acme.dns_provider = "cloudflare".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn yaml_roundtrip_preserves_api_key() {
        let dir = std::env::temp_dir().join("pylon-config-test");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");

        let cfg = Config::default_template();
        cfg.save(&path).unwrap();

        set_api_key(&path, "salt:hash", "2026-01-01T00:00:00Z").unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.api.api_key.hash, "salt:hash");
        assert_eq!(loaded.api.api_key.created_at, "2026-01-01T00:00:00Z");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn default_template_validates() {
        assert!(Config::default_template().validate().is_ok());
    }

    #[test]
    fn load_rejects_malformed_yaml() {
        let dir = std::env::temp_dir().join("pylon-config-bad");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(&path, "domain: [unterminated").unwrap();

        assert!(Config::load(&path).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
