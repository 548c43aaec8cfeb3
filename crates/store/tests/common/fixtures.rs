use bytes::Bytes;
use parcel_core::{ChunkLayout, FileDocument, UploadId, UploadRequest};
use serde_json::json;
use time::OffsetDateTime;

/// Build a file document for a fresh session owned by `agent_id`.
pub fn sample_document(agent_id: &str, size: u64) -> FileDocument {
    let request: UploadRequest = serde_json::from_value(json!({
        "action_id": "action-1",
        "agent_id": agent_id,
        "src": "endpoint",
        "file": {
            "name": "capture.pcap",
            "mime_type": "application/vnd.tcpdump.pcap",
            "size": size,
            "hash": { "sha256": "0".repeat(64) },
            "Compression": "none"
        },
        "data": { "tag": "forensics" }
    }))
    .unwrap();
    let layout = ChunkLayout::derive(size, 4096, 4).unwrap();
    FileDocument::new(&request, UploadId::new(), &layout, OffsetDateTime::now_utc())
}

/// Generate deterministic test data using a seeded pseudo-random generator.
/// Same seed produces same output (reproducible tests).
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}
