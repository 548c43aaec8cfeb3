//! Digest algorithms and incremental hashing.

use md5::Md5;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// A digest algorithm a caller may declare for a file.
///
/// Variants are ordered weakest to strongest, so `max()` over a set of
/// declared algorithms picks the preferred one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// Legacy 128-bit MD5.
    Md5,
    /// 256-bit SHA-2.
    Sha256,
}

impl DigestAlgorithm {
    /// Name as it appears in request and document fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Length of the raw digest in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha256 => 32,
        }
    }

    /// Create an incremental hasher for this algorithm.
    pub fn hasher(&self) -> Digester {
        Digester::new(*self)
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The digest a caller declared at initiation, decoded to raw bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ExpectedDigest {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl ExpectedDigest {
    /// Parse a hex-encoded digest (either case) for the given algorithm.
    pub fn parse(algorithm: DigestAlgorithm, value: &str) -> crate::Result<Self> {
        let value = value.trim();
        let expected_len = algorithm.digest_len() * 2;
        if value.len() != expected_len {
            return Err(crate::Error::InvalidDigest(format!(
                "{algorithm} digest must be {expected_len} hex characters, got {}",
                value.len()
            )));
        }
        let bytes = hex::decode(value)
            .map_err(|e| crate::Error::InvalidDigest(format!("{algorithm} digest: {e}")))?;
        Ok(Self { algorithm, bytes })
    }

    /// The algorithm this digest was declared with.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encode as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Debug for ExpectedDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExpectedDigest({}:{})", self.algorithm, self.to_hex())
    }
}

/// Incremental hasher over one of the supported algorithms.
#[derive(Clone)]
pub enum Digester {
    Md5(Md5),
    Sha256(Sha256),
}

impl Digester {
    /// Create a fresh hasher.
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Self::Md5(Md5::new()),
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    /// The algorithm being computed.
    pub fn algorithm(&self) -> DigestAlgorithm {
        match self {
            Self::Md5(_) => DigestAlgorithm::Md5,
            Self::Sha256(_) => DigestAlgorithm::Sha256,
        }
    }

    /// Fold more bytes into the running digest.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> ComputedDigest {
        match self {
            Self::Md5(h) => ComputedDigest {
                algorithm: DigestAlgorithm::Md5,
                bytes: h.finalize().to_vec(),
            },
            Self::Sha256(h) => ComputedDigest {
                algorithm: DigestAlgorithm::Sha256,
                bytes: h.finalize().to_vec(),
            },
        }
    }
}

impl fmt::Debug for Digester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digester({})", self.algorithm())
    }
}

/// A finalized digest over an uploaded file.
#[derive(Clone, PartialEq, Eq)]
pub struct ComputedDigest {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl ComputedDigest {
    /// Compute a digest over a single buffer.
    pub fn compute(algorithm: DigestAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encode as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Byte-wise comparison against the declared digest.
    pub fn matches(&self, expected: &ExpectedDigest) -> bool {
        self.algorithm == expected.algorithm && self.bytes == expected.bytes
    }
}

impl fmt::Debug for ComputedDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComputedDigest({}:{})", self.algorithm, self.to_hex())
    }
}

impl fmt::Display for ComputedDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// SHA-256 of a single chunk payload, used to recognize identical resubmissions.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkFingerprint([u8; 32]);

impl ChunkFingerprint {
    /// Fingerprint a chunk payload.
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ChunkFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkFingerprint({})", &hex::encode(self.0)[..16])
    }
}

/// The `file.hash` object of an upload request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileHashes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    /// Other hash fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileHashes {
    /// Select the strongest declared digest.
    ///
    /// Returns `Ok(None)` when no supported digest is present, and an error
    /// when the preferred digest is present but malformed.
    pub fn strongest(&self) -> crate::Result<Option<ExpectedDigest>> {
        let declared = [
            (DigestAlgorithm::Sha256, self.sha256.as_deref()),
            (DigestAlgorithm::Md5, self.md5.as_deref()),
        ];
        let best = declared
            .into_iter()
            .filter_map(|(algorithm, value)| {
                value
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| (algorithm, v))
            })
            .max_by_key(|(algorithm, _)| *algorithm);

        match best {
            Some((algorithm, value)) => ExpectedDigest::parse(algorithm, value).map(Some),
            None => Ok(None),
        }
    }
}
