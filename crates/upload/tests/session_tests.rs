//! Begin / chunk / complete behavior of the upload session manager.

mod common;

use bytes::Bytes;
use common::{
    FlakyStore, md5_hex, request_for, request_with_hash, seeded_bytes, sha256_hex, split,
    test_config, uploader,
};
use parcel_core::config::UploadConfig;
use parcel_core::{DigestAlgorithm, UploadId, UploadStatus};
use parcel_store::DocumentStore;
use parcel_upload::{SessionObserver, UploadError, Uploader};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn test_concrete_scenario_250000_bytes() {
    let config = UploadConfig {
        max_chunk_size: 65_536,
        ..test_config()
    };
    let (uploader, store) = uploader(config);
    let data = seeded_bytes(1, 250_000);

    let begin = uploader.begin(&request_for("agent-1", &data)).await.unwrap();
    assert_eq!(begin.chunk_size, 62_500);
    assert_eq!(begin.total_chunks, 4);

    for (index, chunk) in split(&data, begin.chunk_size).into_iter().enumerate() {
        assert_eq!(chunk.len(), 62_500);
        let receipt = uploader
            .submit_chunk(&begin.upload_id, index as u32, chunk)
            .await
            .unwrap();
        assert_eq!(receipt.first_received, index == 0);
        assert_eq!(receipt.is_final, index == 3);
    }

    let outcome = uploader.complete(&begin.upload_id).await.unwrap();
    assert_eq!(outcome.status, UploadStatus::Ready);
    assert_eq!(outcome.algorithm, DigestAlgorithm::Sha256);
    assert_eq!(outcome.digest, sha256_hex(&data));

    let doc = store.inner.get_session_metadata(&begin.document).await.unwrap();
    assert_eq!(doc.file.status, UploadStatus::Ready);
    assert_eq!(doc.file.chunk_size, 62_500);
    assert_eq!(doc.file.total_chunks, Some(4));
    assert_eq!(store.inner.chunk_count(), 4);
    assert_eq!(uploader.open_sessions(), 0);
}

#[tokio::test]
async fn test_out_of_order_round_trip_sha256() {
    let (uploader, store) = uploader(test_config());
    let data = seeded_bytes(2, 10_000);
    let begin = uploader.begin(&request_for("agent-1", &data)).await.unwrap();
    assert_eq!(begin.chunk_size, 2_500);
    let chunks = split(&data, begin.chunk_size);

    for index in [3u32, 1, 2, 0] {
        uploader
            .submit_chunk(&begin.upload_id, index, chunks[index as usize].clone())
            .await
            .unwrap();
    }

    let outcome = uploader.complete(&begin.upload_id).await.unwrap();
    assert_eq!(outcome.digest, sha256_hex(&data));

    // Envelopes are stored under "<upload id>.<index>" with the final flag set once.
    for index in 0..4u32 {
        let envelope = store
            .inner
            .get_chunk_envelope("endpoint", &begin.upload_id, index)
            .await
            .unwrap();
        assert_eq!(envelope.document_id(), format!("{}.{index}", begin.upload_id));
        assert_eq!(envelope.is_final, index == 3);
        assert_eq!(envelope.payload, chunks[index as usize]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_round_trip_md5() {
    let (uploader, _store) = uploader(test_config());
    let data = seeded_bytes(3, 9_999);
    let request = request_with_hash("agent-1", data.len() as u64, json!({ "md5": md5_hex(&data) }));
    let begin = uploader.begin(&request).await.unwrap();
    let chunks = split(&data, begin.chunk_size);
    assert_eq!(chunks.len(), 4);

    let handles: Vec<_> = chunks
        .into_iter()
        .enumerate()
        .rev()
        .map(|(index, chunk)| {
            let uploader = uploader.clone();
            let id = begin.upload_id;
            tokio::spawn(async move { uploader.submit_chunk(&id, index as u32, chunk).await })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    let outcome = uploader.complete(&begin.upload_id).await.unwrap();
    assert_eq!(outcome.algorithm, DigestAlgorithm::Md5);
    assert_eq!(outcome.digest, md5_hex(&data));
}

#[tokio::test]
async fn test_sha256_preferred_over_md5() {
    let (uploader, _store) = uploader(test_config());
    let data = seeded_bytes(4, 100);
    let request = request_with_hash(
        "agent-1",
        100,
        json!({ "md5": md5_hex(&data), "sha256": sha256_hex(&data) }),
    );
    let begin = uploader.begin(&request).await.unwrap();
    let snapshot = uploader.status(&begin.upload_id).await.unwrap();
    assert_eq!(snapshot.algorithm, DigestAlgorithm::Sha256);
}

#[tokio::test]
async fn test_tampered_chunk_fails_integrity() {
    let (uploader, store) = uploader(test_config());
    let data = seeded_bytes(5, 4_000);
    let begin = uploader.begin(&request_for("agent-1", &data)).await.unwrap();

    for (index, chunk) in split(&data, begin.chunk_size).into_iter().enumerate() {
        let chunk = if index == 2 {
            let mut bytes = chunk.to_vec();
            bytes[17] ^= 0x01;
            Bytes::from(bytes)
        } else {
            chunk
        };
        uploader
            .submit_chunk(&begin.upload_id, index as u32, chunk)
            .await
            .unwrap();
    }

    let err = uploader.complete(&begin.upload_id).await.unwrap_err();
    let UploadError::Integrity { algorithm, expected, actual } = &err else {
        panic!("expected integrity error, got {err:?}");
    };
    assert_eq!(*algorithm, DigestAlgorithm::Sha256);
    assert_eq!(expected, &sha256_hex(&data));
    assert_ne!(expected, actual);

    let snapshot = uploader.status(&begin.upload_id).await.unwrap();
    assert_eq!(snapshot.status, UploadStatus::UploadError);
    assert_eq!(uploader.open_sessions(), 0, "slot released on mismatch");

    let doc = store.inner.get_session_metadata(&begin.document).await.unwrap();
    assert_eq!(doc.file.status, UploadStatus::UploadError);

    // The verdict is final.
    assert!(matches!(
        uploader.complete(&begin.upload_id).await,
        Err(UploadError::Integrity { .. })
    ));
    assert!(matches!(
        uploader.submit_chunk(&begin.upload_id, 0, Bytes::new()).await,
        Err(UploadError::NotFound(_))
    ));
}

/// Counts integrity failures reported by the uploader.
#[derive(Default)]
struct FailureCounter {
    failures: AtomicUsize,
}

impl SessionObserver for FailureCounter {
    fn integrity_failed(&self, _upload_id: &UploadId) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_integrity_failure_observed_once() {
    let counter = Arc::new(FailureCounter::default());
    let uploader = Uploader::new(test_config(), FlakyStore::new())
        .with_observer(counter.clone());
    let data = seeded_bytes(5, 3_000);
    let declared = seeded_bytes(9, 3_000);
    let begin = uploader
        .begin(&request_for("agent-1", &declared))
        .await
        .unwrap();
    for (index, chunk) in split(&data, begin.chunk_size).into_iter().enumerate() {
        uploader
            .submit_chunk(&begin.upload_id, index as u32, chunk)
            .await
            .unwrap();
    }

    for _ in 0..3 {
        assert!(matches!(
            uploader.complete(&begin.upload_id).await,
            Err(UploadError::Integrity { .. })
        ));
    }
    assert_eq!(counter.failures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_complete_twice_is_idempotent() {
    let (uploader, store) = uploader(test_config());
    let data = seeded_bytes(6, 1_000);
    let begin = uploader.begin(&request_for("agent-1", &data)).await.unwrap();
    for (index, chunk) in split(&data, begin.chunk_size).into_iter().enumerate() {
        uploader
            .submit_chunk(&begin.upload_id, index as u32, chunk)
            .await
            .unwrap();
    }

    let first = uploader.complete(&begin.upload_id).await.unwrap();
    let writes = store.chunk_writes.load(Ordering::SeqCst);
    let second = uploader.complete(&begin.upload_id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.chunk_writes.load(Ordering::SeqCst), writes);
}

#[tokio::test]
async fn test_duplicate_chunk_is_accepted_once() {
    let (uploader, _store) = uploader(test_config());
    let data = seeded_bytes(7, 1_000);
    let begin = uploader.begin(&request_for("agent-1", &data)).await.unwrap();
    let chunks = split(&data, begin.chunk_size);

    let first = uploader
        .submit_chunk(&begin.upload_id, 0, chunks[0].clone())
        .await
        .unwrap();
    assert!(!first.duplicate);
    let again = uploader
        .submit_chunk(&begin.upload_id, 0, chunks[0].clone())
        .await
        .unwrap();
    assert!(again.duplicate);
    assert!(!again.first_received);

    let snapshot = uploader.status(&begin.upload_id).await.unwrap();
    assert_eq!(snapshot.received_chunks, 1);

    // Different bytes for an index already digested are refused.
    let mut altered = chunks[0].to_vec();
    altered[0] ^= 0xff;
    let err = uploader
        .submit_chunk(&begin.upload_id, 0, Bytes::from(altered))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)), "{err:?}");

    for (index, chunk) in chunks.into_iter().enumerate().skip(1) {
        uploader
            .submit_chunk(&begin.upload_id, index as u32, chunk)
            .await
            .unwrap();
    }
    let outcome = uploader.complete(&begin.upload_id).await.unwrap();
    assert_eq!(outcome.digest, sha256_hex(&data));
}

#[tokio::test]
async fn test_incomplete_upload_rejected() {
    let (uploader, _store) = uploader(test_config());
    let data = seeded_bytes(8, 1_000);
    let begin = uploader.begin(&request_for("agent-1", &data)).await.unwrap();
    let chunks = split(&data, begin.chunk_size);
    uploader
        .submit_chunk(&begin.upload_id, 1, chunks[1].clone())
        .await
        .unwrap();

    let err = uploader.complete(&begin.upload_id).await.unwrap_err();
    match err {
        UploadError::Validation(msg) => assert!(msg.contains("incomplete"), "{msg}"),
        other => panic!("expected validation error, got {other:?}"),
    }
    let snapshot = uploader.status(&begin.upload_id).await.unwrap();
    assert_eq!(snapshot.status, UploadStatus::Uploading);
    assert_eq!(uploader.open_sessions(), 1);
}

#[tokio::test]
async fn test_chunk_validation() {
    let (uploader, _store) = uploader(test_config());
    let data = seeded_bytes(9, 1_001);
    let begin = uploader.begin(&request_for("agent-1", &data)).await.unwrap();
    assert_eq!(begin.chunk_size, 251);

    // Out of range.
    let err = uploader
        .submit_chunk(&begin.upload_id, 4, Bytes::from_static(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));

    // Non-final chunks must be exactly chunk_size, the last one the remainder.
    let err = uploader
        .submit_chunk(&begin.upload_id, 0, Bytes::from(vec![0u8; 250]))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));
    let err = uploader
        .submit_chunk(&begin.upload_id, 3, Bytes::from(vec![0u8; 251]))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));

    let last = split(&data, begin.chunk_size).pop().unwrap();
    assert_eq!(last.len(), 248);
    uploader.submit_chunk(&begin.upload_id, 3, last).await.unwrap();
}

#[tokio::test]
async fn test_unknown_upload_not_found() {
    let (uploader, _store) = uploader(test_config());
    let id = UploadId::new();
    assert!(matches!(
        uploader.submit_chunk(&id, 0, Bytes::new()).await,
        Err(UploadError::NotFound(_))
    ));
    assert!(matches!(
        uploader.complete(&id).await,
        Err(UploadError::NotFound(_))
    ));
    assert!(matches!(uploader.delete(&id).await, Err(UploadError::NotFound(_))));
    assert!(matches!(uploader.status(&id).await, Err(UploadError::NotFound(_))));
}

#[tokio::test]
async fn test_begin_validation_consumes_no_slot() {
    let (uploader, store) = uploader(test_config());

    let mut missing_src = request_for("agent-1", b"data");
    missing_src.source.clear();
    let too_big = request_with_hash("agent-2", 1024 * 1024 + 1, json!({ "sha256": "0".repeat(64) }));
    let empty = request_with_hash("agent-3", 0, json!({ "sha256": "0".repeat(64) }));
    let unhashed = request_with_hash("agent-4", 10, json!({}));
    let bad_hash = request_with_hash("agent-5", 10, json!({ "sha256": "xyz" }));

    for request in [missing_src, too_big, empty, unhashed, bad_hash] {
        let err = uploader.begin(&request).await.unwrap_err();
        assert!(matches!(err, UploadError::Validation(_)), "{err:?}");
    }
    assert_eq!(uploader.open_sessions(), 0);
    assert_eq!(uploader.registered_sessions(), 0);
    assert_eq!(store.inner.file_count(), 0);
}

#[tokio::test]
async fn test_first_chunk_status_failure_is_not_fatal() {
    let (uploader, store) = uploader(test_config());
    store.fail_status_updates.store(true, Ordering::SeqCst);
    let data = seeded_bytes(10, 400);
    let begin = uploader.begin(&request_for("agent-1", &data)).await.unwrap();

    let receipt = uploader
        .submit_chunk(&begin.upload_id, 0, split(&data, begin.chunk_size)[0].clone())
        .await
        .unwrap();
    assert!(receipt.first_received);
    assert_eq!(store.status_updates.load(Ordering::SeqCst), 1);

    let snapshot = uploader.status(&begin.upload_id).await.unwrap();
    assert_eq!(snapshot.status, UploadStatus::Uploading);
}

#[tokio::test]
async fn test_failed_chunk_write_is_repaired_by_retry() {
    let (uploader, store) = uploader(test_config());
    let data = seeded_bytes(11, 800);
    let begin = uploader.begin(&request_for("agent-1", &data)).await.unwrap();
    let chunks = split(&data, begin.chunk_size);

    store.fail_chunks.store(true, Ordering::SeqCst);
    let err = uploader
        .submit_chunk(&begin.upload_id, 0, chunks[0].clone())
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Backend(_)));
    assert_eq!(
        uploader.status(&begin.upload_id).await.unwrap().received_chunks,
        0
    );

    store.fail_chunks.store(false, Ordering::SeqCst);
    for (index, chunk) in chunks.into_iter().enumerate() {
        uploader
            .submit_chunk(&begin.upload_id, index as u32, chunk)
            .await
            .unwrap();
    }
    let outcome = uploader.complete(&begin.upload_id).await.unwrap();
    assert_eq!(outcome.digest, sha256_hex(&data));
}

#[tokio::test]
async fn test_failed_finalize_can_be_retried() {
    let (uploader, store) = uploader(test_config());
    let data = seeded_bytes(12, 800);
    let begin = uploader.begin(&request_for("agent-1", &data)).await.unwrap();
    for (index, chunk) in split(&data, begin.chunk_size).into_iter().enumerate() {
        uploader
            .submit_chunk(&begin.upload_id, index as u32, chunk)
            .await
            .unwrap();
    }

    store.fail_finalize.store(true, Ordering::SeqCst);
    let err = uploader.complete(&begin.upload_id).await.unwrap_err();
    assert!(matches!(err, UploadError::Backend(_)));
    assert_eq!(
        uploader.status(&begin.upload_id).await.unwrap().status,
        UploadStatus::Uploading
    );
    assert_eq!(uploader.open_sessions(), 1);

    store.fail_finalize.store(false, Ordering::SeqCst);
    let outcome = uploader.complete(&begin.upload_id).await.unwrap();
    assert_eq!(outcome.status, UploadStatus::Ready);
    assert_eq!(outcome.digest, sha256_hex(&data));
    assert_eq!(uploader.open_sessions(), 0);
}

#[tokio::test]
async fn test_delete_releases_slot() {
    let (uploader, store) = uploader(test_config());
    let data = seeded_bytes(13, 800);
    let begin = uploader.begin(&request_for("agent-1", &data)).await.unwrap();
    assert_eq!(uploader.open_sessions(), 1);

    uploader.delete(&begin.upload_id).await.unwrap();
    assert_eq!(uploader.open_sessions(), 0);
    assert_eq!(uploader.registered_sessions(), 0);

    let doc = store.inner.get_session_metadata(&begin.document).await.unwrap();
    assert_eq!(doc.file.status, UploadStatus::Deleted);

    assert!(matches!(
        uploader.complete(&begin.upload_id).await,
        Err(UploadError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_after_ready_is_rejected() {
    let (uploader, _store) = uploader(test_config());
    let data = seeded_bytes(14, 10);
    let begin = uploader.begin(&request_for("agent-1", &data)).await.unwrap();
    for (index, chunk) in split(&data, begin.chunk_size).into_iter().enumerate() {
        uploader
            .submit_chunk(&begin.upload_id, index as u32, chunk)
            .await
            .unwrap();
    }
    uploader.complete(&begin.upload_id).await.unwrap();

    let err = uploader.delete(&begin.upload_id).await.unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));
    assert!(!err.is_retryable());
    assert_eq!(
        uploader.status(&begin.upload_id).await.unwrap().status,
        UploadStatus::Ready
    );
}

#[tokio::test]
async fn test_duplicate_document_id_is_backend_error() {
    let (uploader, _store) = uploader(test_config());
    let data = seeded_bytes(15, 10);
    uploader.begin(&request_for("agent-1", &data)).await.unwrap();

    let err = uploader
        .begin(&request_for("agent-1", &data))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Backend(_)), "{err:?}");
    assert_eq!(uploader.open_sessions(), 1, "failed begin released its slot");
}
