//! Chunk envelope wire format.
//!
//! Each chunk is persisted as a self-describing CBOR map:
//!
//! ```text
//! { "bid": <upload id>, "chunk": <index>, "last": <bool>, "data": <bytes> }
//! ```
//!
//! under the document id `"<upload id>.<index>"`. The id is derived purely
//! from the session and index so a retried chunk overwrites its earlier copy.

use crate::upload::UploadId;
use bytes::Bytes;
use ciborium::Value;
use std::fmt;

const FIELD_UPLOAD: &str = "bid";
const FIELD_INDEX: &str = "chunk";
const FIELD_LAST: &str = "last";
const FIELD_DATA: &str = "data";

/// Document id for a chunk: `"<upload id>.<index>"`.
pub fn chunk_document_id(upload_id: &UploadId, index: u32) -> String {
    format!("{upload_id}.{index}")
}

/// One chunk of an upload, ready to be written to the document store.
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkEnvelope {
    /// Session the chunk belongs to.
    pub upload_id: UploadId,
    /// Position of the chunk in the file.
    pub index: u32,
    /// Whether this is the last chunk of the file.
    pub is_final: bool,
    /// Source / namespace used to route the write. Not part of the encoding.
    pub source: String,
    /// Raw chunk bytes.
    pub payload: Bytes,
}

impl ChunkEnvelope {
    pub fn new(
        upload_id: UploadId,
        index: u32,
        is_final: bool,
        source: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            upload_id,
            index,
            is_final,
            source: source.into(),
            payload,
        }
    }

    /// The persistence key for this chunk.
    pub fn document_id(&self) -> String {
        chunk_document_id(&self.upload_id, self.index)
    }

    /// Encode as a CBOR map.
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        let value = Value::Map(vec![
            (
                Value::Text(FIELD_UPLOAD.to_string()),
                Value::Text(self.upload_id.to_string()),
            ),
            (
                Value::Text(FIELD_INDEX.to_string()),
                Value::Integer(self.index.into()),
            ),
            (
                Value::Text(FIELD_LAST.to_string()),
                Value::Bool(self.is_final),
            ),
            (
                Value::Text(FIELD_DATA.to_string()),
                Value::Bytes(self.payload.to_vec()),
            ),
        ]);

        let mut out = Vec::with_capacity(self.payload.len() + 64);
        ciborium::into_writer(&value, &mut out)
            .map_err(|e| crate::Error::Serialization(e.to_string()))?;
        Ok(out)
    }

    /// Decode an envelope previously produced by [`encode`](Self::encode).
    ///
    /// `source` is supplied by the caller since it is not part of the encoding.
    pub fn decode(source: impl Into<String>, encoded: &[u8]) -> crate::Result<Self> {
        let value: Value = ciborium::from_reader(encoded)
            .map_err(|e| crate::Error::InvalidEnvelope(e.to_string()))?;
        let Value::Map(entries) = value else {
            return Err(crate::Error::InvalidEnvelope(
                "expected a CBOR map".to_string(),
            ));
        };

        let mut upload_id = None;
        let mut index = None;
        let mut is_final = None;
        let mut payload = None;

        for (key, value) in entries {
            let Value::Text(key) = key else {
                continue;
            };
            match (key.as_str(), value) {
                (FIELD_UPLOAD, Value::Text(id)) => upload_id = Some(UploadId::parse(&id)?),
                (FIELD_INDEX, Value::Integer(n)) => {
                    let n = u32::try_from(i128::from(n)).map_err(|_| {
                        crate::Error::InvalidEnvelope("chunk index out of range".to_string())
                    })?;
                    index = Some(n);
                }
                (FIELD_LAST, Value::Bool(last)) => is_final = Some(last),
                (FIELD_DATA, Value::Bytes(data)) => payload = Some(Bytes::from(data)),
                (other, _) => {
                    return Err(crate::Error::InvalidEnvelope(format!(
                        "unexpected or mistyped field: {other}"
                    )));
                }
            }
        }

        let missing = |field: &str| crate::Error::InvalidEnvelope(format!("missing {field}"));
        Ok(Self {
            upload_id: upload_id.ok_or_else(|| missing(FIELD_UPLOAD))?,
            index: index.ok_or_else(|| missing(FIELD_INDEX))?,
            is_final: is_final.ok_or_else(|| missing(FIELD_LAST))?,
            source: source.into(),
            payload: payload.ok_or_else(|| missing(FIELD_DATA))?,
        })
    }
}

impl fmt::Debug for ChunkEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkEnvelope")
            .field("upload_id", &self.upload_id)
            .field("index", &self.index)
            .field("is_final", &self.is_final)
            .field("source", &self.source)
            .field("size", &self.payload.len())
            .finish()
    }
}
