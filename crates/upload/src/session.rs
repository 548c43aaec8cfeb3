//! Upload session state machine.
//!
//! [`Uploader`] implements the begin / chunk / complete protocol on top of
//! the registry, admission controller, ordered digest and document store.

use crate::admission::{AdmissionController, ChunkToken};
use crate::error::{AdmissionScope, UploadError, UploadResult};
use crate::registry::{SessionEntry, SessionRegistry, SessionState, Verdict};
use crate::verifier::Offer;
use bytes::Bytes;
use parcel_core::config::UploadConfig;
use parcel_core::{
    ChunkEnvelope, ChunkLayout, DigestAlgorithm, DocumentRef, FileDocument, FinalFields,
    UploadId, UploadRequest, UploadStatus,
};
use parcel_store::DocumentStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Returned by [`Uploader::begin`].
#[derive(Clone, Debug)]
pub struct BeginResult {
    pub upload_id: UploadId,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub document: DocumentRef,
}

/// Admission of one chunk, returned by [`Uploader::chunk`].
///
/// Holds the session's chunk token until dropped or passed to
/// [`Uploader::record_chunk`].
pub struct ChunkDescriptor {
    token: ChunkToken,
    entry: Arc<SessionEntry>,
    pub upload_id: UploadId,
    pub index: u32,
    pub is_final: bool,
    /// True for the call that moved the session to `UPLOADING`.
    pub first_received: bool,
    pub chunk_size: u64,
    /// Exact payload length required for this index.
    pub expected_len: u64,
    pub document: DocumentRef,
    /// Source the chunk envelope is written under.
    pub source: String,
}

impl std::fmt::Debug for ChunkDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkDescriptor")
            .field("upload_id", &self.upload_id)
            .field("index", &self.index)
            .field("is_final", &self.is_final)
            .field("first_received", &self.first_received)
            .field("expected_len", &self.expected_len)
            .finish()
    }
}

/// Acknowledgement for a stored chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub upload_id: UploadId,
    pub index: u32,
    pub is_final: bool,
    pub first_received: bool,
    /// Identical bytes had already been recorded for this index.
    pub duplicate: bool,
    pub size: u64,
}

/// Result of a successful completion. Repeated completions return a copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompletionOutcome {
    pub upload_id: UploadId,
    pub status: UploadStatus,
    pub algorithm: DigestAlgorithm,
    pub digest: String,
    pub total_chunks: u32,
}

/// Point-in-time view of a session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub upload_id: UploadId,
    pub status: UploadStatus,
    pub document: DocumentRef,
    pub size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub received_chunks: u32,
    pub algorithm: DigestAlgorithm,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Sessions touched by one reclamation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Idle sessions moved to a terminal state.
    pub expired: usize,
    /// Entries removed from the registry.
    pub evicted: usize,
}

/// Receives session lifecycle events, typically to feed metrics.
///
/// Each event is reported once per session, however often the caller
/// retries the operation that produced it.
pub trait SessionObserver: Send + Sync + 'static {
    /// The finalized digest did not match the declared one.
    fn integrity_failed(&self, _upload_id: &UploadId) {}
}

/// The upload session manager.
pub struct Uploader {
    config: UploadConfig,
    admission: AdmissionController,
    registry: SessionRegistry,
    store: Arc<dyn DocumentStore>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl Uploader {
    pub fn new(config: UploadConfig, store: Arc<dyn DocumentStore>) -> Self {
        let admission =
            AdmissionController::new(config.max_concurrent_uploads, config.max_parallel_chunks);
        Self {
            config,
            admission,
            registry: SessionRegistry::new(),
            store,
            observer: None,
        }
    }

    /// Report lifecycle events to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Number of sessions holding a global slot.
    pub fn open_sessions(&self) -> usize {
        self.admission.open_sessions()
    }

    /// Number of sessions in the registry, including retained terminal ones.
    pub fn registered_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Open a new upload session.
    pub async fn begin(&self, request: &UploadRequest) -> UploadResult<BeginResult> {
        request.validate()?;
        let size = request.file.size;
        if size > self.config.max_file_size {
            return Err(UploadError::Validation(format!(
                "file size {size} exceeds maximum of {} bytes",
                self.config.max_file_size
            )));
        }
        let expected = request.expected_digest()?;
        let layout = ChunkLayout::derive(
            size,
            self.config.max_chunk_size,
            self.config.target_chunk_count,
        )?;

        // Dropping the slot on any error below releases it.
        let slot = self.admission.try_acquire_global()?;

        let upload_id = UploadId::new();
        let doc = FileDocument::new(request, upload_id, &layout, OffsetDateTime::now_utc());
        let document = self.store.create_session_metadata(&doc).await?;

        self.registry.insert(SessionEntry::new(
            upload_id,
            document.clone(),
            layout,
            expected,
            self.admission.chunk_gate(),
            slot,
            self.config.max_parallel_chunks,
        ));

        info!(
            upload_id = %upload_id,
            document = %document,
            size,
            chunk_size = layout.chunk_size,
            total_chunks = layout.total_chunks,
            "upload session created"
        );

        Ok(BeginResult {
            upload_id,
            chunk_size: layout.chunk_size,
            total_chunks: layout.total_chunks,
            document,
        })
    }

    /// Admit one chunk for processing.
    ///
    /// Flips the session to `UPLOADING` on its first admitted chunk. A chunk
    /// beyond the next expected index cannot take the session's last token.
    pub async fn chunk(&self, upload_id: &UploadId, index: u32) -> UploadResult<ChunkDescriptor> {
        let entry = self.lookup(upload_id)?;

        let mut state = entry.state.lock().await;
        if !state.status.is_active() {
            return Err(not_found(upload_id));
        }
        if !entry.layout.contains(index) {
            return Err(UploadError::Validation(format!(
                "chunk index {index} out of range, upload has {} chunks",
                entry.layout.total_chunks
            )));
        }
        let token = if index > state.verifier.folded() {
            entry.gate.try_acquire_ahead(upload_id)?
        } else {
            entry.gate.try_acquire(upload_id)?
        };

        let first_received = state.status == UploadStatus::AwaitingUpload
            && state.transition(UploadStatus::Uploading);
        state.touch();
        drop(state);

        if first_received {
            debug!(upload_id = %upload_id, "first chunk received");
        }

        Ok(ChunkDescriptor {
            token,
            upload_id: *upload_id,
            index,
            is_final: entry.layout.is_final(index),
            first_received,
            chunk_size: entry.layout.chunk_size,
            expected_len: entry.layout.expected_len(index),
            document: entry.document.clone(),
            source: entry.document.source.clone(),
            entry,
        })
    }

    /// Fold an admitted chunk into the digest and persist its envelope.
    ///
    /// The chunk token is released when this returns, on every path.
    pub async fn record_chunk(
        &self,
        descriptor: ChunkDescriptor,
        payload: Bytes,
    ) -> UploadResult<ChunkReceipt> {
        let ChunkDescriptor {
            token,
            entry,
            upload_id,
            index,
            is_final,
            first_received,
            expected_len,
            source,
            ..
        } = descriptor;

        let size = payload.len() as u64;
        if size != expected_len {
            return Err(UploadError::Validation(format!(
                "chunk {index} must be {expected_len} bytes, got {size}"
            )));
        }

        let deadline = tokio::time::Instant::now() + self.config.ordering_wait_timeout();
        let duplicate = loop {
            let mut state = entry.state.lock().await;
            if !state.status.is_active() {
                return Err(not_found(&upload_id));
            }
            match state.verifier.offer(index, payload.clone()) {
                Offer::Folded { drained } => {
                    drop(state);
                    if drained > 0 {
                        debug!(upload_id = %upload_id, chunk = index, drained, "drained buffered chunks");
                    }
                    entry.progress.notify_waiters();
                    break false;
                }
                Offer::Buffered => break false,
                Offer::Duplicate => break true,
                Offer::Conflict => {
                    return Err(UploadError::Validation(format!(
                        "chunk {index} was already received with different content"
                    )));
                }
                Offer::Full => {
                    // Registered before the lock is released, so no wakeup is lost.
                    let progressed = entry.progress.notified();
                    drop(state);
                    if tokio::time::timeout_at(deadline, progressed).await.is_err() {
                        warn!(
                            upload_id = %upload_id,
                            chunk = index,
                            "timed out waiting for earlier chunks"
                        );
                        return Err(UploadError::AdmissionLimit {
                            scope: AdmissionScope::Session,
                            limit: self.admission.max_parallel_chunks(),
                        });
                    }
                }
            }
        };

        let envelope = ChunkEnvelope::new(upload_id, index, is_final, source, payload);
        self.store.persist_chunk_envelope(&envelope).await?;

        let mut state = entry.state.lock().await;
        if !state.status.is_active() {
            return Err(not_found(&upload_id));
        }
        state.received.insert(index);
        state.touch();
        drop(state);
        token.release();

        debug!(upload_id = %upload_id, chunk = index, size, duplicate, "chunk stored");

        Ok(ChunkReceipt {
            upload_id,
            index,
            is_final,
            first_received,
            duplicate,
            size,
        })
    }

    /// Admit, persist and fold one chunk.
    ///
    /// A failed `UPLOADING` status write on the first chunk is logged and
    /// does not fail the chunk.
    pub async fn submit_chunk(
        &self,
        upload_id: &UploadId,
        index: u32,
        payload: Bytes,
    ) -> UploadResult<ChunkReceipt> {
        let descriptor = self.chunk(upload_id, index).await?;

        if descriptor.first_received
            && let Err(e) = self
                .store
                .update_session_status(&descriptor.document, UploadStatus::Uploading)
                .await
        {
            warn!(upload_id = %upload_id, error = %e, "failed to update upload status");
        }

        self.record_chunk(descriptor, payload).await
    }

    /// Verify the digest and finish the session.
    pub async fn complete(&self, upload_id: &UploadId) -> UploadResult<CompletionOutcome> {
        let entry = self.lookup(upload_id)?;
        let _lifecycle = entry.lifecycle.lock().await;

        let mut state = entry.state.lock().await;
        if let Some(outcome) = &state.outcome {
            return Ok(outcome.clone());
        }
        if state.status.is_terminal() {
            return Err(terminal_error(&entry, &state));
        }

        // A previous attempt may have verified the digest but failed to persist it.
        let verified = match &state.verdict {
            Some(Verdict::Verified(digest)) => Some(digest.clone()),
            _ => None,
        };
        let digest = match verified {
            Some(digest) => digest,
            None => {
                let total = entry.layout.total_chunks;
                let received = state.received_count();
                if received < total {
                    return Err(UploadError::Validation(format!(
                        "incomplete upload: received {received} of {total} chunks"
                    )));
                }
                let Some(digest) = state.verifier.finalize() else {
                    return Err(UploadError::Validation(format!(
                        "incomplete upload: {} of {total} chunks digested",
                        state.verifier.folded()
                    )));
                };

                if !digest.matches(&entry.expected) {
                    state.verdict = Some(Verdict::Mismatch(digest));
                    state.transition(UploadStatus::UploadError);
                    let err = terminal_error(&entry, &state);
                    drop(state);
                    entry.progress.notify_waiters();

                    error!(upload_id = %upload_id, error = %err, "upload failed verification");
                    if let Some(observer) = &self.observer {
                        observer.integrity_failed(upload_id);
                    }
                    if let Err(e) = self
                        .store
                        .update_session_status(&entry.document, UploadStatus::UploadError)
                        .await
                    {
                        error!(upload_id = %upload_id, error = %e, "failed to record upload error status");
                    }
                    return Err(err);
                }

                state.verdict = Some(Verdict::Verified(digest.clone()));
                digest
            }
        };
        drop(state);

        let fields = FinalFields {
            status: UploadStatus::Ready,
            total_chunks: entry.layout.total_chunks,
            digest: digest.clone(),
            completed_at: OffsetDateTime::now_utc(),
        };
        self.store
            .finalize_session_metadata(&entry.document, &fields)
            .await?;

        let outcome = CompletionOutcome {
            upload_id: *upload_id,
            status: UploadStatus::Ready,
            algorithm: digest.algorithm(),
            digest: digest.to_hex(),
            total_chunks: entry.layout.total_chunks,
        };
        let mut state = entry.state.lock().await;
        state.transition(UploadStatus::Ready);
        state.outcome = Some(outcome.clone());
        drop(state);
        entry.progress.notify_waiters();

        info!(
            upload_id = %upload_id,
            digest = %outcome.digest,
            total_chunks = outcome.total_chunks,
            "upload completed"
        );
        Ok(outcome)
    }

    /// Abandon a session that has not finished.
    pub async fn delete(&self, upload_id: &UploadId) -> UploadResult<()> {
        let entry = self.lookup(upload_id)?;
        let _lifecycle = entry.lifecycle.lock().await;

        let mut state = entry.state.lock().await;
        match state.status {
            UploadStatus::Deleted => return Err(not_found(upload_id)),
            status if status.is_terminal() => {
                return Err(UploadError::Validation(format!(
                    "upload {upload_id} is already {status}"
                )));
            }
            _ => {}
        }
        state.transition(UploadStatus::Deleted);
        drop(state);

        self.registry.remove(upload_id);
        entry.progress.notify_waiters();
        info!(upload_id = %upload_id, "upload deleted");

        self.store
            .update_session_status(&entry.document, UploadStatus::Deleted)
            .await?;
        Ok(())
    }

    /// Current view of a session.
    pub async fn status(&self, upload_id: &UploadId) -> UploadResult<SessionSnapshot> {
        let entry = self.lookup(upload_id)?;
        let state = entry.state.lock().await;
        Ok(SessionSnapshot {
            upload_id: *upload_id,
            status: state.status,
            document: entry.document.clone(),
            size: entry.layout.declared_size,
            chunk_size: entry.layout.chunk_size,
            total_chunks: entry.layout.total_chunks,
            received_chunks: state.received_count(),
            algorithm: entry.expected.algorithm(),
            created_at: entry.created_at,
        })
    }

    /// Reclaim idle sessions and evict old terminal ones.
    ///
    /// An idle session still `AWAITING_UPLOAD` becomes `DELETED`; one already
    /// `UPLOADING` becomes `UPLOAD_ERROR`. Sessions busy completing are
    /// skipped until the next pass.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let mut expired = Vec::new();

        for entry in self.registry.entries() {
            let Ok(_lifecycle) = entry.lifecycle.try_lock() else {
                continue;
            };
            let mut state = entry.state.lock().await;

            if state.status.is_active() {
                let idle = now.saturating_duration_since(state.last_activity);
                if idle < self.config.session_timeout() {
                    continue;
                }
                let next = if state.status == UploadStatus::AwaitingUpload {
                    UploadStatus::Deleted
                } else {
                    UploadStatus::UploadError
                };
                state.transition(next);
                state.finished_at = Some(now);
                drop(state);
                entry.progress.notify_waiters();

                info!(
                    upload_id = %entry.upload_id,
                    idle_secs = idle.as_secs(),
                    status = %next,
                    "reclaimed abandoned upload"
                );
                report.expired += 1;
                if next == UploadStatus::Deleted {
                    self.registry.remove(&entry.upload_id);
                    report.evicted += 1;
                }
                expired.push((entry.upload_id, entry.document.clone(), next));
            } else if let Some(finished_at) = state.finished_at
                && now.saturating_duration_since(finished_at) >= self.config.terminal_retention()
            {
                drop(state);
                self.registry.remove(&entry.upload_id);
                report.evicted += 1;
            }
        }

        for (upload_id, document, status) in expired {
            if let Err(e) = self.store.update_session_status(&document, status).await {
                warn!(upload_id = %upload_id, error = %e, "failed to record reclaimed upload status");
            }
        }

        if report != SweepReport::default() {
            debug!(expired = report.expired, evicted = report.evicted, "upload sweep finished");
        }
        report
    }

    fn lookup(&self, upload_id: &UploadId) -> UploadResult<Arc<SessionEntry>> {
        self.registry
            .get(upload_id)
            .ok_or_else(|| not_found(upload_id))
    }
}

/// Run [`Uploader::sweep`] on a fixed interval until the task is aborted.
pub fn spawn_sweeper(uploader: Arc<Uploader>) -> JoinHandle<()> {
    let period = uploader.config().sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            uploader.sweep(Instant::now()).await;
        }
    })
}

fn not_found(upload_id: &UploadId) -> UploadError {
    UploadError::NotFound(upload_id.to_string())
}

/// The error a finished session answers with.
fn terminal_error(entry: &SessionEntry, state: &SessionState) -> UploadError {
    match (&state.status, &state.verdict) {
        (UploadStatus::UploadError, Some(Verdict::Mismatch(actual))) => UploadError::Integrity {
            algorithm: entry.expected.algorithm(),
            expected: entry.expected.to_hex(),
            actual: actual.to_hex(),
        },
        (UploadStatus::UploadError, _) => {
            UploadError::NotFound(format!("{} (expired)", entry.upload_id))
        }
        _ => not_found(&entry.upload_id),
    }
}
