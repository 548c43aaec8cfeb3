//! Local filesystem document store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <source>/files/<doc id>.json            file documents
//! <source>/chunks/<upload id>.<n>.cbor    chunk envelopes
//! ```

use crate::error::{StoreError, StoreResult};
use crate::traits::{DocumentStore, validate_segment};
use async_trait::async_trait;
use parcel_core::{
    ChunkEnvelope, DocumentRef, FileDocument, FinalFields, UploadId, UploadStatus,
    chunk_document_id,
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

const FILES_DIR: &str = "files";
const CHUNKS_DIR: &str = "chunks";

/// Local filesystem document store.
pub struct FilesystemDocumentStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles on file documents.
    metadata_lock: Mutex<()>,
}

impl FilesystemDocumentStore {
    /// Create a new filesystem store, creating the root if needed.
    pub async fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            metadata_lock: Mutex::new(()),
        })
    }

    fn file_path(&self, doc: &DocumentRef) -> StoreResult<PathBuf> {
        validate_segment("source", &doc.source)?;
        validate_segment("doc id", &doc.doc_id)?;
        Ok(self
            .root
            .join(&doc.source)
            .join(FILES_DIR)
            .join(format!("{}.json", doc.doc_id)))
    }

    fn chunk_path(&self, source: &str, upload_id: &UploadId, index: u32) -> StoreResult<PathBuf> {
        validate_segment("source", source)?;
        Ok(self
            .root
            .join(source)
            .join(CHUNKS_DIR)
            .join(format!("{}.cbor", chunk_document_id(upload_id, index))))
    }

    /// Write to a uniquely named temp file, fsync, then rename over `path`.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        let temp_path = path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_document(&self, doc: &DocumentRef) -> StoreResult<(PathBuf, FileDocument)> {
        let path = self.file_path(doc)?;
        let raw = fs::read(&path).await.map_err(|e| not_found_or_io(e, doc))?;
        let file = serde_json::from_slice(&raw)?;
        Ok((path, file))
    }

    async fn write_document(&self, path: &Path, file: &FileDocument) -> StoreResult<()> {
        let raw = serde_json::to_vec_pretty(file)?;
        self.write_atomic(path, &raw).await
    }
}

fn not_found_or_io(e: std::io::Error, what: impl ToString) -> StoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(what.to_string())
    } else {
        StoreError::Io(e)
    }
}

#[async_trait]
impl DocumentStore for FilesystemDocumentStore {
    #[instrument(skip(self, doc), fields(backend = "filesystem", upload_id = %doc.upload_id))]
    async fn create_session_metadata(&self, doc: &FileDocument) -> StoreResult<DocumentRef> {
        let doc_ref = doc.document_ref();
        let path = self.file_path(&doc_ref)?;

        let _guard = self.metadata_lock.lock().await;
        if fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists(doc_ref.to_string()));
        }
        self.write_document(&path, doc).await?;
        Ok(doc_ref)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn update_session_status(
        &self,
        doc: &DocumentRef,
        status: UploadStatus,
    ) -> StoreResult<()> {
        let _guard = self.metadata_lock.lock().await;
        let (path, mut file) = self.read_document(doc).await?;
        file.file.status = status;
        self.write_document(&path, &file).await
    }

    #[instrument(
        skip(self, envelope),
        fields(backend = "filesystem", upload_id = %envelope.upload_id, chunk = envelope.index)
    )]
    async fn persist_chunk_envelope(&self, envelope: &ChunkEnvelope) -> StoreResult<()> {
        let path = self.chunk_path(&envelope.source, &envelope.upload_id, envelope.index)?;
        let encoded = envelope.encode()?;
        self.write_atomic(&path, &encoded).await
    }

    #[instrument(skip(self, final_fields), fields(backend = "filesystem"))]
    async fn finalize_session_metadata(
        &self,
        doc: &DocumentRef,
        final_fields: &FinalFields,
    ) -> StoreResult<()> {
        let _guard = self.metadata_lock.lock().await;
        let (path, mut file) = self.read_document(doc).await?;
        file.apply_final(final_fields);
        self.write_document(&path, &file).await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_session_metadata(&self, doc: &DocumentRef) -> StoreResult<FileDocument> {
        self.read_document(doc).await.map(|(_, file)| file)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_chunk_envelope(
        &self,
        source: &str,
        upload_id: &UploadId,
        index: u32,
    ) -> StoreResult<ChunkEnvelope> {
        let path = self.chunk_path(source, upload_id, index)?;
        let raw = fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(e, chunk_document_id(upload_id, index)))?;
        Ok(ChunkEnvelope::decode(source, &raw)?)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    async fn health_check(&self) -> StoreResult<()> {
        let meta = fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}
