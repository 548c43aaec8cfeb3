//! Admission control.
//!
//! Two independent caps bound the work the service accepts: a global cap
//! on concurrently open sessions and a per-session cap on chunks being
//! processed at once. Acquisition never waits; a full cap is reported to
//! the caller immediately. Slots and tokens are RAII permits, so every
//! successful acquire is released exactly once when the permit drops.
//!
//! Chunks ahead of the next expected index may park on the ordering gate
//! while holding a token, so they share only `max_parallel_chunks - 1`
//! tokens. The remaining token is always available to the chunk that
//! closes the gap.

use crate::error::{AdmissionScope, UploadError, UploadResult};
use parcel_core::UploadId;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

/// Issues global session slots and per-session chunk gates.
#[derive(Clone, Debug)]
pub struct AdmissionController {
    global: Arc<Semaphore>,
    max_sessions: usize,
    max_parallel_chunks: usize,
}

impl AdmissionController {
    pub fn new(max_sessions: usize, max_parallel_chunks: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            max_parallel_chunks,
        }
    }

    /// Take one global session slot, failing immediately if none is free.
    pub fn try_acquire_global(&self) -> UploadResult<GlobalSlot> {
        match Arc::clone(&self.global).try_acquire_owned() {
            Ok(permit) => Ok(GlobalSlot { _permit: permit }),
            Err(_) => {
                warn!(
                    limit = self.max_sessions,
                    "max concurrent uploads reached, rejecting new session"
                );
                Err(UploadError::AdmissionLimit {
                    scope: AdmissionScope::Global,
                    limit: self.max_sessions,
                })
            }
        }
    }

    /// Create the chunk gate for a new session.
    pub fn chunk_gate(&self) -> ChunkGate {
        ChunkGate {
            permits: Arc::new(Semaphore::new(self.max_parallel_chunks)),
            ahead: Arc::new(Semaphore::new(self.max_parallel_chunks.saturating_sub(1))),
            limit: self.max_parallel_chunks,
        }
    }

    /// Number of sessions currently holding a global slot.
    pub fn open_sessions(&self) -> usize {
        self.max_sessions - self.global.available_permits()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn max_parallel_chunks(&self) -> usize {
        self.max_parallel_chunks
    }
}

/// A global open-session slot. Released on drop.
#[derive(Debug)]
pub struct GlobalSlot {
    _permit: OwnedSemaphorePermit,
}

impl GlobalSlot {
    /// Release the slot now.
    pub fn release(self) {}
}

/// Per-session cap on concurrently processed chunks.
#[derive(Clone, Debug)]
pub struct ChunkGate {
    permits: Arc<Semaphore>,
    /// Reservations for chunks ahead of the next expected index.
    ahead: Arc<Semaphore>,
    limit: usize,
}

impl ChunkGate {
    /// Take one chunk token, failing immediately if the session is saturated.
    pub fn try_acquire(&self, upload_id: &UploadId) -> UploadResult<ChunkToken> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => Ok(ChunkToken {
                _permit: permit,
                _ahead: None,
            }),
            Err(_) => Err(self.saturated(upload_id)),
        }
    }

    /// Take a token for a chunk that cannot be folded yet.
    ///
    /// Fails if it would take the last token, which stays reserved for the
    /// next expected chunk.
    pub fn try_acquire_ahead(&self, upload_id: &UploadId) -> UploadResult<ChunkToken> {
        let Ok(ahead) = Arc::clone(&self.ahead).try_acquire_owned() else {
            return Err(self.saturated(upload_id));
        };
        let mut token = self.try_acquire(upload_id)?;
        token._ahead = Some(ahead);
        Ok(token)
    }

    fn saturated(&self, upload_id: &UploadId) -> UploadError {
        warn!(
            upload_id = %upload_id,
            limit = self.limit,
            "max parallel chunks reached for upload"
        );
        UploadError::AdmissionLimit {
            scope: AdmissionScope::Session,
            limit: self.limit,
        }
    }

    /// Number of chunk tokens currently held.
    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }
}

/// Permission to process one chunk. Released on drop.
#[derive(Debug)]
pub struct ChunkToken {
    _permit: OwnedSemaphorePermit,
    _ahead: Option<OwnedSemaphorePermit>,
}

impl ChunkToken {
    /// Release the token now.
    pub fn release(self) {}
}
