#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use md5::Md5;
use parcel_core::config::UploadConfig;
use parcel_core::{
    ChunkEnvelope, DocumentRef, FileDocument, FinalFields, UploadId, UploadRequest, UploadStatus,
};
use parcel_store::{DocumentStore, MemoryDocumentStore, StoreError, StoreResult};
use parcel_upload::Uploader;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Memory store with switchable failures and call counters.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryDocumentStore,
    pub fail_status_updates: AtomicBool,
    pub fail_chunks: AtomicBool,
    pub fail_finalize: AtomicBool,
    pub status_updates: AtomicUsize,
    pub chunk_writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn check(flag: &AtomicBool, what: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("injected {what} failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn create_session_metadata(&self, doc: &FileDocument) -> StoreResult<DocumentRef> {
        self.inner.create_session_metadata(doc).await
    }

    async fn update_session_status(
        &self,
        doc: &DocumentRef,
        status: UploadStatus,
    ) -> StoreResult<()> {
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_status_updates, "status update")?;
        self.inner.update_session_status(doc, status).await
    }

    async fn persist_chunk_envelope(&self, envelope: &ChunkEnvelope) -> StoreResult<()> {
        self.chunk_writes.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_chunks, "chunk write")?;
        self.inner.persist_chunk_envelope(envelope).await
    }

    async fn finalize_session_metadata(
        &self,
        doc: &DocumentRef,
        final_fields: &FinalFields,
    ) -> StoreResult<()> {
        Self::check(&self.fail_finalize, "finalize")?;
        self.inner.finalize_session_metadata(doc, final_fields).await
    }

    async fn get_session_metadata(&self, doc: &DocumentRef) -> StoreResult<FileDocument> {
        self.inner.get_session_metadata(doc).await
    }

    async fn get_chunk_envelope(
        &self,
        source: &str,
        upload_id: &UploadId,
        index: u32,
    ) -> StoreResult<ChunkEnvelope> {
        self.inner.get_chunk_envelope(source, upload_id, index).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// Small limits so tests stay fast.
pub fn test_config() -> UploadConfig {
    UploadConfig {
        max_file_size: 1024 * 1024,
        max_chunk_size: 64 * 1024,
        target_chunk_count: 4,
        max_concurrent_uploads: 3,
        max_parallel_chunks: 4,
        ordering_wait_timeout_ms: 2_000,
        ..UploadConfig::default()
    }
}

pub fn uploader(config: UploadConfig) -> (Arc<Uploader>, Arc<FlakyStore>) {
    let store = FlakyStore::new();
    let uploader = Uploader::new(config, store.clone());
    (Arc::new(uploader), store)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Upload request for `data` declaring its SHA-256.
pub fn request_for(agent_id: &str, data: &[u8]) -> UploadRequest {
    request_with_hash(agent_id, data.len() as u64, json!({ "sha256": sha256_hex(data) }))
}

pub fn request_with_hash(agent_id: &str, size: u64, hash: serde_json::Value) -> UploadRequest {
    serde_json::from_value(json!({
        "action_id": "action-1",
        "agent_id": agent_id,
        "src": "endpoint",
        "file": {
            "name": "memory.dmp",
            "mime_type": "application/octet-stream",
            "size": size,
            "hash": hash
        }
    }))
    .unwrap()
}

/// Deterministic pseudo-random payload.
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (state >> 33) as u8
        })
        .collect()
}

/// Split `data` into chunks of `chunk_size`.
pub fn split(data: &[u8], chunk_size: u64) -> Vec<Bytes> {
    data.chunks(chunk_size as usize)
        .map(Bytes::copy_from_slice)
        .collect()
}
