//! Test fixtures for generating upload data.

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    data
}

/// Compute SHA-256 hash of data as hex string.
#[allow(dead_code)]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Initiation body for `data`, declaring its SHA-256.
#[allow(dead_code)]
pub fn upload_request(agent_id: &str, data: &[u8]) -> Value {
    upload_request_with_hash(agent_id, data.len() as u64, json!({ "sha256": sha256_hex(data) }))
}

/// Initiation body with an arbitrary size and hash object.
#[allow(dead_code)]
pub fn upload_request_with_hash(agent_id: &str, size: u64, hash: Value) -> Value {
    json!({
        "action_id": "action-7",
        "agent_id": agent_id,
        "src": "endpoint",
        "file": {
            "name": "memory.dmp",
            "mime_type": "application/octet-stream",
            "size": size,
            "hash": hash
        }
    })
}
