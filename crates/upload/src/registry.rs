//! Upload session registry.
//!
//! The registry is the only shared structure: a concurrent map from upload
//! id to a reference-counted session entry. Each entry carries its own locks
//! so unrelated sessions never contend with each other.

use crate::admission::{ChunkGate, GlobalSlot};
use crate::session::CompletionOutcome;
use crate::verifier::OrderedDigest;
use dashmap::DashMap;
use parcel_core::{ChunkLayout, ComputedDigest, DocumentRef, ExpectedDigest, UploadId, UploadStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Result of comparing the finalized digest with the declared one.
#[derive(Clone, Debug)]
pub(crate) enum Verdict {
    Verified(ComputedDigest),
    Mismatch(ComputedDigest),
}

/// One registered upload session.
///
/// Fields outside `state` are fixed at creation and read without locking.
pub(crate) struct SessionEntry {
    pub upload_id: UploadId,
    pub document: DocumentRef,
    pub layout: ChunkLayout,
    pub expected: ExpectedDigest,
    pub gate: ChunkGate,
    pub created_at: OffsetDateTime,
    pub state: Mutex<SessionState>,
    /// Signalled whenever the digest advances or the session leaves the
    /// active states, waking chunks parked on a full ordering buffer.
    pub progress: Notify,
    /// Serializes completion, deletion and reclamation of the session.
    pub lifecycle: Mutex<()>,
}

/// Mutable per-session state, guarded by `SessionEntry::state`.
pub(crate) struct SessionState {
    pub status: UploadStatus,
    /// Indices whose envelope has been persisted.
    pub received: BTreeSet<u32>,
    pub verifier: OrderedDigest,
    pub verdict: Option<Verdict>,
    pub outcome: Option<CompletionOutcome>,
    pub slot: Option<GlobalSlot>,
    pub last_activity: Instant,
    pub finished_at: Option<Instant>,
}

impl SessionEntry {
    pub fn new(
        upload_id: UploadId,
        document: DocumentRef,
        layout: ChunkLayout,
        expected: ExpectedDigest,
        gate: ChunkGate,
        slot: GlobalSlot,
        buffer_capacity: usize,
    ) -> Self {
        let verifier = OrderedDigest::new(expected.algorithm(), layout.total_chunks, buffer_capacity);
        Self {
            upload_id,
            document,
            layout,
            expected,
            gate,
            created_at: OffsetDateTime::now_utc(),
            state: Mutex::new(SessionState {
                status: UploadStatus::AwaitingUpload,
                received: BTreeSet::new(),
                verifier,
                verdict: None,
                outcome: None,
                slot: Some(slot),
                last_activity: Instant::now(),
                finished_at: None,
            }),
            progress: Notify::new(),
            lifecycle: Mutex::new(()),
        }
    }
}

impl SessionState {
    /// Move to `next` if the transition is legal.
    ///
    /// Entering a terminal state releases the global slot.
    pub fn transition(&mut self, next: UploadStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            if let Some(slot) = self.slot.take() {
                slot.release();
            }
            self.finished_at = Some(Instant::now());
        }
        true
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Number of distinct chunks persisted so far.
    pub fn received_count(&self) -> u32 {
        u32::try_from(self.received.len()).unwrap_or(u32::MAX)
    }
}

/// Concurrent map of live sessions.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: DashMap<UploadId, Arc<SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: SessionEntry) -> Arc<SessionEntry> {
        let entry = Arc::new(entry);
        self.sessions.insert(entry.upload_id, Arc::clone(&entry));
        entry
    }

    pub fn get(&self, upload_id: &UploadId) -> Option<Arc<SessionEntry>> {
        self.sessions.get(upload_id).map(|e| Arc::clone(e.value()))
    }

    pub fn remove(&self, upload_id: &UploadId) {
        if self.sessions.remove(upload_id).is_some() {
            debug!(upload_id = %upload_id, "evicted upload session");
        }
    }

    /// Snapshot of all entries, taken without holding shard locks afterwards.
    pub fn entries(&self) -> Vec<Arc<SessionEntry>> {
        self.sessions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
