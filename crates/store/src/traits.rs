//! Document store trait definitions.

use crate::error::StoreResult;
use async_trait::async_trait;
use parcel_core::{ChunkEnvelope, DocumentRef, FileDocument, FinalFields, UploadId, UploadStatus};

/// Durable storage for upload metadata and chunk envelopes.
///
/// The upload core only depends on this contract; durability, indexing and
/// querying are the backend's business. Backends are shared across request
/// handlers and must be safe for concurrent use.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Write the file document for a new session.
    ///
    /// Fails with `AlreadyExists` if a document with the same id is present.
    async fn create_session_metadata(&self, doc: &FileDocument) -> StoreResult<DocumentRef>;

    /// Rewrite the `file.Status` field of an existing file document.
    async fn update_session_status(
        &self,
        doc: &DocumentRef,
        status: UploadStatus,
    ) -> StoreResult<()>;

    /// Write one chunk envelope under `"<upload id>.<index>"`.
    ///
    /// Writing the same key twice overwrites the earlier envelope.
    async fn persist_chunk_envelope(&self, envelope: &ChunkEnvelope) -> StoreResult<()>;

    /// Record the outcome of a successful completion on the file document.
    async fn finalize_session_metadata(
        &self,
        doc: &DocumentRef,
        final_fields: &FinalFields,
    ) -> StoreResult<()>;

    /// Read back a file document.
    async fn get_session_metadata(&self, doc: &DocumentRef) -> StoreResult<FileDocument>;

    /// Read back a chunk envelope.
    async fn get_chunk_envelope(
        &self,
        source: &str,
        upload_id: &UploadId,
        index: u32,
    ) -> StoreResult<ChunkEnvelope>;

    /// Get the backend name for logging and metrics.
    fn backend_name(&self) -> &'static str;

    /// Check that the backend is reachable.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// have nothing to connect to.
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Reject document ids and sources that cannot be used as a single path
/// segment or map key.
pub(crate) fn validate_segment(kind: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        return Err(crate::StoreError::InvalidKey(format!("{kind} is empty")));
    }
    if value == "." || value.contains("..") || value.contains(['/', '\\', '\0']) {
        return Err(crate::StoreError::InvalidKey(format!(
            "{kind} contains unsafe characters: {value}"
        )));
    }
    Ok(())
}
