//! Ordered digest folding.
//!
//! Chunks may be processed concurrently, so they arrive out of order. The
//! digest must still see bytes in ascending index order: the next expected
//! chunk is folded immediately, chunks ahead of it wait in a bounded buffer
//! and are drained as soon as the gap closes.

use bytes::Bytes;
use parcel_core::{ChunkFingerprint, ComputedDigest, DigestAlgorithm, Digester};
use std::collections::{BTreeMap, HashMap};

/// What happened to an offered chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    /// Folded into the digest, along with `drained` buffered successors.
    Folded { drained: u32 },
    /// Held until the chunks before it arrive.
    Buffered,
    /// Same bytes as already recorded for this index; nothing changed.
    Duplicate,
    /// Different bytes than already recorded for this index; rejected.
    Conflict,
    /// Ahead of the next expected index and the buffer is full.
    Full,
}

/// Running digest over a session's chunks in index order.
pub struct OrderedDigest {
    digester: Option<Digester>,
    algorithm: DigestAlgorithm,
    next_index: u32,
    total_chunks: u32,
    pending: BTreeMap<u32, Bytes>,
    fingerprints: HashMap<u32, ChunkFingerprint>,
    capacity: usize,
}

impl OrderedDigest {
    /// `capacity` bounds how many out-of-order chunks are held at once.
    pub fn new(algorithm: DigestAlgorithm, total_chunks: u32, capacity: usize) -> Self {
        Self {
            digester: Some(algorithm.hasher()),
            algorithm,
            next_index: 0,
            total_chunks,
            pending: BTreeMap::new(),
            fingerprints: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Number of leading chunks already folded.
    pub fn folded(&self) -> u32 {
        self.next_index
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether every chunk has been folded.
    pub fn is_complete(&self) -> bool {
        self.next_index == self.total_chunks
    }

    /// Compare `payload` against what is already recorded for `index`.
    ///
    /// Returns `None` if nothing is recorded yet.
    pub fn check_duplicate(&self, index: u32, fingerprint: &ChunkFingerprint) -> Option<Offer> {
        self.fingerprints.get(&index).map(|seen| {
            if seen == fingerprint {
                Offer::Duplicate
            } else {
                Offer::Conflict
            }
        })
    }

    /// Offer a chunk. The first bytes recorded for an index are binding.
    pub fn offer(&mut self, index: u32, payload: Bytes) -> Offer {
        let fingerprint = ChunkFingerprint::compute(&payload);
        if let Some(outcome) = self.check_duplicate(index, &fingerprint) {
            return outcome;
        }

        if index != self.next_index {
            if self.pending.len() >= self.capacity {
                return Offer::Full;
            }
            self.fingerprints.insert(index, fingerprint);
            self.pending.insert(index, payload);
            return Offer::Buffered;
        }

        let Some(digester) = self.digester.as_mut() else {
            // Finalized digests only see duplicates of folded chunks.
            return Offer::Conflict;
        };
        self.fingerprints.insert(index, fingerprint);
        digester.update(&payload);
        self.next_index += 1;

        let mut drained = 0;
        while let Some(next) = self.pending.remove(&self.next_index) {
            digester.update(&next);
            self.next_index += 1;
            drained += 1;
        }
        Offer::Folded { drained }
    }

    /// Finalize the digest once every chunk has been folded.
    ///
    /// Returns `None` while chunks are missing or after a previous call.
    pub fn finalize(&mut self) -> Option<ComputedDigest> {
        if !self.is_complete() {
            return None;
        }
        self.digester.take().map(Digester::finalize)
    }
}

impl std::fmt::Debug for OrderedDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedDigest")
            .field("algorithm", &self.algorithm)
            .field("next_index", &self.next_index)
            .field("total_chunks", &self.total_chunks)
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .finish()
    }
}
