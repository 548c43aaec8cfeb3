//! Core domain types and shared logic for the parcel upload service.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload identifiers and the persisted status vocabulary
//! - Caller upload requests and the file metadata document
//! - Chunk-size policy
//! - Digest algorithms and incremental hashing
//! - The chunk envelope wire format

pub mod config;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod upload;

pub use envelope::{ChunkEnvelope, chunk_document_id};
pub use error::{Error, Result};
pub use hash::{ChunkFingerprint, ComputedDigest, DigestAlgorithm, Digester, ExpectedDigest};
pub use upload::{
    ChunkLayout, DocumentRef, FileDocument, FinalFields, UploadId, UploadRequest, UploadStatus,
};

/// Default maximum chunk size: 4 MiB
pub const MAX_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default maximum declared file size: 100 MiB
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Number of chunks a file is split into before the chunk size hits the cap.
pub const DEFAULT_TARGET_CHUNK_COUNT: u64 = 4;
