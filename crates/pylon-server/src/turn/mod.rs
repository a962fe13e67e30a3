//! TURN credential issuance and allocation authentication.

pub mod auth;
pub mod credentials;
pub mod secrets;
pub mod server;

use pylon_core::config::TurnConfig;
use serde::{Deserialize, Serialize};

/// TURN credentials as returned to peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnCredentials {
    pub username: String,
    pub password: String,
    pub ttl: u64,
    /// Expiry as an RFC 3339 timestamp.
    pub expires: String,
    pub urls: Vec<String>,
}

/// STUN/TURN/TURNS URLs advertised for this server.
#[derive(Debug, Clone)]
pub struct IceUrls {
    pub stun: String,
    pub turn: Vec<String>,
    pub turns: Option<String>,
}

impl IceUrls {
    /// Flattened URL list (STUN first, TURNS last when present).
    pub fn flatten(&self) -> Vec<String> {
        let mut urls = Vec::with_capacity(self.turn.len() + 2);
        urls.push(self.stun.clone());
        urls.extend(self.turn.iter().cloned());
        urls.extend(self.turns.clone());
        urls
    }
}

/// Build the advertised ICE URLs from the TURN configuration.
pub fn ice_urls(cfg: &TurnConfig) -> IceUrls {
    let host = &cfg.public_ip;
    let stun = format!("stun:{host}:{}", cfg.ports.udp);
    let turn = vec![
        format!("turn:{host}:{}?transport=udp", cfg.ports.udp),
        format!("turn:{host}:{}?transport=tcp", cfg.ports.tcp),
    ];
    let turns = (cfg.ports.tls > 0)
        .then(|| format!("turns:{host}:{}?transport=tcp", cfg.ports.tls));
    IceUrls { stun, turn, turns }
}

/// Format a unix expiry as RFC 3339 (UTC).
pub fn format_expiry(expires_at: u64) -> String {
    chrono::DateTime::from_timestamp(expires_at as i64, 0)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_core::config::TurnPorts;

    fn cfg() -> TurnConfig {
        TurnConfig {
            public_ip: "198.51.100.7".to_string(),
            ports: TurnPorts {
                udp: 3478,
                tcp: 3478,
                tls: 5349,
            },
            ..TurnConfig::default()
        }
    }

    #[test]
    fn urls_include_stun_turn_and_turns() {
        let urls = ice_urls(&cfg()).flatten();
        assert_eq!(
            urls,
            vec![
                "stun:198.51.100.7:3478",
                "turn:198.51.100.7:3478?transport=udp",
                "turn:198.51.100.7:3478?transport=tcp",
                "turns:198.51.100.7:5349?transport=tcp",
            ]
        );
    }

    #[test]
    fn turns_omitted_without_tls_port() {
        let mut cfg = cfg();
        cfg.ports.tls = 0;
        let urls = ice_urls(&cfg);
        assert!(urls.turns.is_none());
        assert_eq!(urls.flatten().len(), 3);
    }

    #[test]
    fn expiry_formats_as_rfc3339() {
        assert_eq!(format_expiry(1_700_000_060), "2023-11-14T22:14:20Z");
    }
}
