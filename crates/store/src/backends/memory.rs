//! In-process document store.
//!
//! Contents live only as long as the process. Chunk envelopes are kept in
//! their encoded form so reads exercise the same codec as durable backends.

use crate::error::{StoreError, StoreResult};
use crate::traits::{DocumentStore, validate_segment};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parcel_core::{
    ChunkEnvelope, DocumentRef, FileDocument, FinalFields, UploadId, UploadStatus,
    chunk_document_id,
};
use tracing::instrument;

/// In-memory document store.
#[derive(Default)]
pub struct MemoryDocumentStore {
    files: DashMap<DocumentRef, FileDocument>,
    chunks: DashMap<(String, String), Bytes>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of file documents held.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Number of chunk envelopes held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    #[instrument(skip(self, doc), fields(backend = "memory", upload_id = %doc.upload_id))]
    async fn create_session_metadata(&self, doc: &FileDocument) -> StoreResult<DocumentRef> {
        let doc_ref = doc.document_ref();
        validate_segment("source", &doc_ref.source)?;
        validate_segment("doc id", &doc_ref.doc_id)?;

        match self.files.entry(doc_ref.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(doc_ref.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(doc.clone());
                Ok(doc_ref)
            }
        }
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn update_session_status(
        &self,
        doc: &DocumentRef,
        status: UploadStatus,
    ) -> StoreResult<()> {
        let mut file = self
            .files
            .get_mut(doc)
            .ok_or_else(|| StoreError::NotFound(doc.to_string()))?;
        file.file.status = status;
        Ok(())
    }

    #[instrument(skip(self, envelope), fields(backend = "memory", chunk = envelope.index))]
    async fn persist_chunk_envelope(&self, envelope: &ChunkEnvelope) -> StoreResult<()> {
        validate_segment("source", &envelope.source)?;
        let encoded = envelope.encode()?;
        self.chunks.insert(
            (envelope.source.clone(), envelope.document_id()),
            Bytes::from(encoded),
        );
        Ok(())
    }

    #[instrument(skip(self, final_fields), fields(backend = "memory"))]
    async fn finalize_session_metadata(
        &self,
        doc: &DocumentRef,
        final_fields: &FinalFields,
    ) -> StoreResult<()> {
        let mut file = self
            .files
            .get_mut(doc)
            .ok_or_else(|| StoreError::NotFound(doc.to_string()))?;
        file.apply_final(final_fields);
        Ok(())
    }

    async fn get_session_metadata(&self, doc: &DocumentRef) -> StoreResult<FileDocument> {
        self.files
            .get(doc)
            .map(|file| file.clone())
            .ok_or_else(|| StoreError::NotFound(doc.to_string()))
    }

    async fn get_chunk_envelope(
        &self,
        source: &str,
        upload_id: &UploadId,
        index: u32,
    ) -> StoreResult<ChunkEnvelope> {
        let key = (source.to_string(), chunk_document_id(upload_id, index));
        let encoded = self
            .chunks
            .get(&key)
            .map(|bytes| bytes.clone())
            .ok_or_else(|| StoreError::NotFound(format!("{source}/{}", key.1)))?;
        Ok(ChunkEnvelope::decode(source, &encoded)?)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
