//! Pylon server library.
//!
//! Core functionality for the pylon server:
//! - TURN REST credentials, secret rotation, and allocation authentication
//! - WebSocket signaling hub with peer registry and service sync
//! - SQLite storage for the per-edge service catalog
//! - REST API with Argon2id-hashed bearer keys
//! - TLS certificate loading boundary

pub mod api;
pub mod apikey;
pub mod registry;
pub mod signaling;
pub mod storage;
pub mod tls;
pub mod turn;
