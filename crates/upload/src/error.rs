//! Upload session error types.

use parcel_core::DigestAlgorithm;
use parcel_store::StoreError;
use std::fmt;
use thiserror::Error;

/// Which admission limit rejected a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdmissionScope {
    /// Cap on concurrently open sessions.
    Global,
    /// Cap on concurrently processed chunks within one session.
    Session,
}

impl AdmissionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionScope::Global => "global",
            AdmissionScope::Session => "session",
        }
    }
}

impl fmt::Display for AdmissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by upload session operations.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Malformed or missing input, out-of-range index, incomplete upload.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A concurrency cap is saturated. Retry later.
    #[error("{scope} upload limit reached ({limit})")]
    AdmissionLimit { scope: AdmissionScope, limit: usize },

    /// Unknown, expired, deleted or already-terminal session.
    #[error("upload not found: {0}")]
    NotFound(String),

    /// The finalized digest does not match the declared one.
    #[error("{algorithm} digest mismatch: expected {expected}, computed {actual}")]
    Integrity {
        algorithm: DigestAlgorithm,
        expected: String,
        actual: String,
    },

    /// Document store failure, propagated unmodified.
    #[error("document store error: {0}")]
    Backend(#[from] StoreError),
}

impl UploadError {
    /// Whether the same request may succeed if retried later unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::AdmissionLimit { .. })
    }

    /// Whether this error is expected load shedding rather than a failure.
    pub fn is_load_shedding(&self) -> bool {
        matches!(self, UploadError::AdmissionLimit { .. })
    }

    /// Short stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Validation(_) => "validation",
            UploadError::AdmissionLimit { .. } => "admission_limit",
            UploadError::NotFound(_) => "not_found",
            UploadError::Integrity { .. } => "integrity",
            UploadError::Backend(_) => "backend",
        }
    }
}

impl From<parcel_core::Error> for UploadError {
    fn from(e: parcel_core::Error) -> Self {
        UploadError::Validation(e.to_string())
    }
}

/// Result type for upload session operations.
pub type UploadResult<T> = std::result::Result<T, UploadError>;
