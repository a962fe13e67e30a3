//! Durable storage for the per-edge service catalog.

pub mod models;
mod queries;


pub use models::EdgeService;
pub use pylon_core::db::DatabaseError;

pylon_core::define_database!(ServiceStore, "Service store migrations complete");
