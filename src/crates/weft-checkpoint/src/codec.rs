//! Materializing checkpoint records as bytes
//!
//! Everything inside a [`RunCheckpoint`](crate::RunCheckpoint) that came
//! from user code (message payloads, scope values, edge buffers,
//! executor snapshots) is an opaque, self-describing `serde_json::Value`.
//! A [`ValueCodec`] turns whole records into bytes and back, and it must
//! be bijective for them: a blob that decodes to anything other than the
//! record that produced it silently corrupts a resumed run.
//!
//! The self-describing payloads constrain the codec choice. A plain
//! non-self-describing format cannot rebuild a `Value` (it has no type
//! tags to replay), so [`BincodeCodec`] frames the record's JSON text
//! inside its binary envelope instead of serializing field-by-field.
//! Backends that want a different trade-off (compression, columnar
//! storage) implement the trait themselves.

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

/// Byte materialization strategy for checkpoint records
///
/// Implementations must satisfy `decode(encode(record)) == record` for
/// every record the runtime produces, opaque payloads included.
pub trait ValueCodec: Send + Sync {
    /// Materialize a record as bytes
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Rebuild a record from bytes produced by [`encode`](ValueCodec::encode)
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;
}

/// JSON text codec (default)
///
/// Stores records as UTF-8 JSON. Self-describing end to end, so opaque
/// payloads round-trip without any framing.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ValueCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Binary codec: JSON text framed in a bincode envelope
///
/// Checkpoint records carry `serde_json::Value` blobs, which bincode
/// alone cannot rebuild (deserializing them needs a self-describing
/// format). The record is therefore rendered to JSON first and the text
/// is what bincode frames; the result keeps bincode's length-prefixed
/// wire shape while staying bijective for opaque payloads.
#[derive(Debug, Clone, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ValueCodec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let text = serde_json::to_vec(value)?;
        Ok(bincode::serialize(&text)?)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        let text: Vec<u8> = bincode::deserialize(data)?;
        Ok(serde_json::from_slice(&text)?)
    }
}
