//! HTTP API server for chunked, digest-verified file uploads.
//!
//! This crate provides the HTTP surface over the upload session manager:
//! - Upload initiation
//! - Chunk submission
//! - Completion with digest verification
//! - Session status and deletion
//! - Health and Prometheus metrics

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
