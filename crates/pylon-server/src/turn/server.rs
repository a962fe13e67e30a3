//! TURN listener bootstrap.
//!
//! Binds the relay's UDP, TCP, and (when certificates are available) TLS
//! listener sockets and holds them together with the shared
//! authentication callback. The packet engine that drives these sockets
//! is an external component; this module owns socket lifetime and the
//! authenticator wiring, so secret rotation reaches the relay through the
//! shared ring without a restart.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tracing::info;

use pylon_core::config::TurnConfig;

use super::auth::TurnAuthenticator;

/// TURN server bootstrap errors. Unavailable ports are fatal.
#[derive(Debug, thiserror::Error)]
pub enum TurnServerError {
    #[error("Failed to bind TURN {listener} listener on {addr}: {source}")]
    Bind {
        listener: &'static str,
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Invalid TURN listen address {0}: {1}")]
    Address(String, std::net::AddrParseError),
}

/// Bound TURN listeners plus the shared allocation authenticator.
pub struct TurnServer {
    realm: String,
    relay_port_range: (u16, u16),
    auth: Arc<TurnAuthenticator>,
    udp: Option<UdpSocket>,
    tcp: Option<TcpListener>,
    tls: Option<(TcpListener, Arc<rustls::ServerConfig>)>,
}

impl TurnServer {
    /// Bind every configured listener. A zero port disables that listener;
    /// the TLS listener also requires certificates.
    pub async fn bind(
        cfg: &TurnConfig,
        auth: Arc<TurnAuthenticator>,
        tls_config: Option<Arc<rustls::ServerConfig>>,
    ) -> Result<Self, TurnServerError> {
        let host = if cfg.public_ip.is_empty() {
            "0.0.0.0"
        } else {
            cfg.public_ip.as_str()
        };

        let udp = match cfg.ports.udp {
            0 => None,
            port => {
                let addr = parse_addr(host, port)?;
                let socket = UdpSocket::bind(addr).await.map_err(|source| {
                    TurnServerError::Bind {
                        listener: "UDP",
                        addr,
                        source,
                    }
                })?;
                info!(%addr, "TURN UDP listener bound");
                Some(socket)
            }
        };

        let tcp = match cfg.ports.tcp {
            0 => None,
            port => {
                let addr = parse_addr(host, port)?;
                let listener = TcpListener::bind(addr).await.map_err(|source| {
                    TurnServerError::Bind {
                        listener: "TCP",
                        addr,
                        source,
                    }
                })?;
                info!(%addr, "TURN TCP listener bound");
                Some(listener)
            }
        };

        let tls = match (cfg.ports.tls, tls_config) {
            (0, _) | (_, None) => None,
            (port, Some(config)) => {
                let addr = parse_addr(host, port)?;
                let listener = TcpListener::bind(addr).await.map_err(|source| {
                    TurnServerError::Bind {
                        listener: "TLS",
                        addr,
                        source,
                    }
                })?;
                info!(%addr, "TURNS TLS listener bound");
                Some((listener, config))
            }
        };

        info!(
            realm = %cfg.realm,
            relay_min = cfg.relay_port_range.min,
            relay_max = cfg.relay_port_range.max,
            "TURN server ready"
        );

        Ok(Self {
            realm: cfg.realm.clone(),
            relay_port_range: (cfg.relay_port_range.min, cfg.relay_port_range.max),
            auth,
            udp,
            tcp,
            tls,
        })
    }

    /// The shared allocation authenticator.
    pub fn auth_handler(&self) -> Arc<TurnAuthenticator> {
        Arc::clone(&self.auth)
    }

    /// Authentication realm.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Inclusive UDP port range for relay allocations.
    pub fn relay_port_range(&self) -> (u16, u16) {
        self.relay_port_range
    }

    /// The bound UDP socket, when enabled.
    pub fn udp_socket(&self) -> Option<&UdpSocket> {
        self.udp.as_ref()
    }

    /// The bound TCP listener, when enabled.
    pub fn tcp_listener(&self) -> Option<&TcpListener> {
        self.tcp.as_ref()
    }

    /// The bound TLS listener and its certificate config, when enabled.
    pub fn tls_listener(&self) -> Option<(&TcpListener, &Arc<rustls::ServerConfig>)> {
        self.tls.as_ref().map(|(l, c)| (l, c))
    }

    /// Release every listener.
    pub fn shutdown(self) {
        info!("TURN server stopped");
    }
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr, TurnServerError> {
    format!("{host}:{port}")
        .parse()
        .map_err(|e| TurnServerError::Address(format!("{host}:{port}"), e))
}
