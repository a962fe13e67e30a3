//! WebRTC signaling between edges and clients.

pub mod hub;
pub mod message;
pub mod service_sync;
pub mod validation;

#[cfg(test)]
mod service_sync_tests;

pub use hub::{ClientConnectError, PeerConnection, SignalingHub};
pub use message::{ClientConnectRequest, SignalingMessage, MAX_FRAME_BYTES};
