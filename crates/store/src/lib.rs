//! Document store boundary for the parcel upload service.
//!
//! This crate provides:
//! - The [`DocumentStore`] trait the upload core persists through
//! - File documents as JSON, chunk envelopes as CBOR
//! - Backends: in-memory and local filesystem

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemDocumentStore, memory::MemoryDocumentStore};
pub use error::{StoreError, StoreResult};
pub use traits::DocumentStore;

use parcel_core::config::StoreConfig;
use std::sync::Arc;

/// Create a document store from configuration.
pub async fn from_config(config: &StoreConfig) -> StoreResult<Arc<dyn DocumentStore>> {
    config.validate().map_err(StoreError::Config)?;

    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryDocumentStore::new())),
        StoreConfig::Filesystem { path } => {
            let backend = FilesystemDocumentStore::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}
