//! TLS certificate boundary.

pub mod config;

pub use config::{TlsConfigError, TlsMode};
