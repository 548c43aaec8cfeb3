//! Upload session types and lifecycle.

use crate::hash::{ComputedDigest, DigestAlgorithm, ExpectedDigest, FileHashes};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique, server-issued identifier for an upload session.
///
/// Backed by a random (v4) UUID so identifiers cannot be guessed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidUploadId(e.to_string()))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload session status.
///
/// The serialized strings are an external contract shared with the
/// document store and must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    /// Session created, no chunk admitted yet.
    AwaitingUpload,
    /// At least one chunk has been admitted.
    Uploading,
    /// Completed and verified.
    Ready,
    /// Completed with a digest mismatch, or abandoned mid-upload.
    UploadError,
    /// Explicitly deleted (or abandoned before any chunk arrived).
    Deleted,
}

impl UploadStatus {
    /// The persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingUpload => "AWAITING_UPLOAD",
            Self::Uploading => "UPLOADING",
            Self::Ready => "READY",
            Self::UploadError => "UPLOAD_ERROR",
            Self::Deleted => "DELETED",
        }
    }

    /// Check if the session can still receive chunks.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::AwaitingUpload | Self::Uploading)
    }

    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `AWAITING_UPLOAD -> UPLOADING -> {READY | UPLOAD_ERROR}`, and `DELETED`
    /// from any non-terminal state. Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        match (self, next) {
            (Self::AwaitingUpload, Self::Uploading) => true,
            (Self::Uploading, Self::Ready | Self::UploadError) => true,
            (Self::AwaitingUpload | Self::Uploading, Self::Deleted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "AWAITING_UPLOAD" => Ok(Self::AwaitingUpload),
            "UPLOADING" => Ok(Self::Uploading),
            "READY" => Ok(Self::Ready),
            "UPLOAD_ERROR" => Ok(Self::UploadError),
            "DELETED" => Ok(Self::Deleted),
            other => Err(crate::Error::Serialization(format!(
                "unknown upload status: {other}"
            ))),
        }
    }
}

/// How a declared file size is split into chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    /// Declared total size in bytes.
    pub declared_size: u64,
    /// Size of every chunk except possibly the last.
    pub chunk_size: u64,
    /// `ceil(declared_size / chunk_size)`.
    pub total_chunks: u32,
}

impl ChunkLayout {
    /// Derive the layout for a declared size.
    ///
    /// `chunk_size = min(max_chunk_size, ceil(declared_size / target_chunk_count))`,
    /// never zero, and `total_chunks = ceil(declared_size / chunk_size)`.
    pub fn derive(
        declared_size: u64,
        max_chunk_size: u64,
        target_chunk_count: u64,
    ) -> crate::Result<Self> {
        if declared_size == 0 {
            return Err(crate::Error::InvalidRequest(
                "declared size must be greater than zero".to_string(),
            ));
        }
        if max_chunk_size == 0 {
            return Err(crate::Error::InvalidChunkSize {
                size: max_chunk_size,
                max: max_chunk_size,
            });
        }

        let chunk_size = declared_size
            .div_ceil(target_chunk_count.max(1))
            .min(max_chunk_size)
            .max(1);
        let total_chunks = u32::try_from(declared_size.div_ceil(chunk_size)).map_err(|_| {
            crate::Error::InvalidChunkSize {
                size: chunk_size,
                max: max_chunk_size,
            }
        })?;

        Ok(Self {
            declared_size,
            chunk_size,
            total_chunks,
        })
    }

    /// Check whether `index` is in `[0, total_chunks)`.
    pub fn contains(&self, index: u32) -> bool {
        index < self.total_chunks
    }

    /// Whether `index` is the last chunk.
    pub fn is_final(&self, index: u32) -> bool {
        index + 1 == self.total_chunks
    }

    /// The exact payload length expected for `index`.
    pub fn expected_len(&self, index: u32) -> u64 {
        if self.is_final(index) {
            self.declared_size - u64::from(self.total_chunks - 1) * self.chunk_size
        } else {
            self.chunk_size
        }
    }
}

/// The `file` object of an upload request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub hash: FileHashes,
    /// Caller-supplied extension fields, never interpreted.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request body for initiating an upload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub action_id: String,
    #[serde(default)]
    pub agent_id: String,
    /// Logical source / namespace the file belongs to.
    #[serde(rename = "src", default)]
    pub source: String,
    pub file: FileSpec,
    /// Caller-supplied extension fields, never interpreted.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UploadRequest {
    /// Check the fields this service depends on.
    pub fn validate(&self) -> crate::Result<()> {
        let required = [
            (&self.file.name, "file name"),
            (&self.file.mime_type, "mime_type"),
            (&self.action_id, "action_id"),
            (&self.agent_id, "agent_id"),
            (&self.source, "src"),
        ];
        for (value, field) in required {
            if value.trim().is_empty() {
                return Err(crate::Error::InvalidRequest(format!("{field} is required")));
            }
        }
        if self.file.size == 0 {
            return Err(crate::Error::InvalidRequest(
                "invalid file size, size is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Identifier of the file document owning the upload.
    pub fn document_id(&self) -> String {
        format!("{}.{}", self.action_id, self.agent_id)
    }

    /// The strongest declared digest. A digest is mandatory.
    pub fn expected_digest(&self) -> crate::Result<ExpectedDigest> {
        self.file.hash.strongest()?.ok_or_else(|| {
            crate::Error::InvalidRequest("file hash (sha256 or md5) is required".to_string())
        })
    }
}

/// Address of a document in the document store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Source / namespace the document lives in.
    pub source: String,
    /// Document identifier within the source.
    pub doc_id: String,
}

impl DocumentRef {
    pub fn new(source: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            doc_id: doc_id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.doc_id)
    }
}

/// A digest verified at completion, as recorded on the file document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedDigest {
    pub algorithm: DigestAlgorithm,
    pub value: String,
}

/// The `file` object of a persisted file document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(default)]
    pub hash: FileHashes,
    #[serde(rename = "ChunkSize")]
    pub chunk_size: u64,
    #[serde(rename = "Status")]
    pub status: UploadStatus,
    #[serde(
        rename = "TotalChunks",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_chunks: Option<u32>,
    #[serde(
        rename = "VerifiedDigest",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub verified_digest: Option<VerifiedDigest>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// File metadata document written to the store at initiation.
///
/// Known fields are typed; everything else the caller sent rides along in
/// `extra` (and `file.extra`) without being inspected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileDocument {
    pub upload_id: UploadId,
    pub action_id: String,
    pub agent_id: String,
    #[serde(rename = "src")]
    pub source: String,
    pub file: FileRecord,
    #[serde(with = "time::serde::rfc3339")]
    pub upload_start: OffsetDateTime,
    #[serde(
        with = "time::serde::rfc3339::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub upload_end: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileDocument {
    /// Build the initial document for a freshly created session.
    pub fn new(
        request: &UploadRequest,
        upload_id: UploadId,
        layout: &ChunkLayout,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            upload_id,
            action_id: request.action_id.clone(),
            agent_id: request.agent_id.clone(),
            source: request.source.clone(),
            file: FileRecord {
                name: request.file.name.clone(),
                mime_type: request.file.mime_type.clone(),
                size: request.file.size,
                hash: request.file.hash.clone(),
                chunk_size: layout.chunk_size,
                status: UploadStatus::AwaitingUpload,
                total_chunks: None,
                verified_digest: None,
                extra: request.file.extra.clone(),
            },
            upload_start: created_at,
            upload_end: None,
            extra: request.extra.clone(),
        }
    }

    /// Where this document is stored.
    pub fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(
            self.source.clone(),
            format!("{}.{}", self.action_id, self.agent_id),
        )
    }

    /// Merge the fields written at successful completion.
    pub fn apply_final(&mut self, fields: &FinalFields) {
        self.file.status = fields.status;
        self.file.total_chunks = Some(fields.total_chunks);
        self.file.verified_digest = Some(VerifiedDigest {
            algorithm: fields.digest.algorithm(),
            value: fields.digest.to_hex(),
        });
        self.upload_end = Some(fields.completed_at);
    }
}

/// Fields written to the file document when an upload completes.
#[derive(Clone, Debug)]
pub struct FinalFields {
    pub status: UploadStatus,
    pub total_chunks: u32,
    pub digest: ComputedDigest,
    pub completed_at: OffsetDateTime,
}
