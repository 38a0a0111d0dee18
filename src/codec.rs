//! Value codec. Values live in the shards as `serde_json::Value` documents so
//! different types can share one file.
//!
//! Decoding goes through serde, which ignores unknown fields unless a type
//! opts into `deny_unknown_fields`. Encoding always writes every field, so
//! files stay readable by older and newer versions of a record alike.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// In-memory contents of one shard: key to encoded document.
///
/// A `BTreeMap` keeps the on-disk object ordered, so identical contents always
/// produce identical files.
pub type Document = BTreeMap<String, Value>;

/// Converts values to documents and whole shards to bytes.
pub trait Codec: Send + Sync {
    /// Encode a single value.
    fn encode<T>(&self, value: &T) -> Result<Value>
    where
        T: Serialize + ?Sized;

    /// Decode a single value. Fails when the shape doesn't match `T`.
    fn decode<T>(&self, document: &Value) -> Result<T>
    where
        T: DeserializeOwned;

    /// Encode a shard snapshot to bytes.
    fn encode_map(&self, map: &Document) -> Result<Vec<u8>>;

    /// Decode bytes back into a shard.
    fn decode_map(&self, bytes: &[u8]) -> Result<Document>;
}

/// JSON codec with optional pretty-printing.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    /// Compact JSON (single line, no extra whitespace).
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretty-printed JSON with indentation. Easier to read by hand.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// `true` when this codec indents its output.
    pub fn is_pretty(&self) -> bool {
        self.pretty
    }
}

impl Codec for JsonCodec {
    fn encode<T>(&self, value: &T) -> Result<Value>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_value(value).map_err(|e| Error::Encode(e.to_string()))
    }

    fn decode<T>(&self, document: &Value) -> Result<T>
    where
        T: DeserializeOwned,
    {
        T::deserialize(document).map_err(|e| Error::Decode(e.to_string()))
    }

    fn encode_map(&self, map: &Document) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(map)
        } else {
            serde_json::to_vec(map)
        };
        bytes.map_err(|e| Error::Encode(e.to_string()))
    }

    fn decode_map(&self, bytes: &[u8]) -> Result<Document> {
        serde_json::from_slice(bytes).map_err(Error::from)
    }
}
