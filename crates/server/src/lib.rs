//! Civic Issue REST API Server Library
//!
//! Provides the HTTP surface for reporting civic issues, listing them and
//! updating their status, plus static serving of uploaded photos.

pub mod error;
pub mod routes;
pub mod upload;

// Re-export for convenience
pub use routes::{create_app, create_routes, AppState};
