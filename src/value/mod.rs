// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Stored values and their encodings.
//!
//! Raw bytes and [`KvU64`] counters are encoded by the engine itself
//! (`VE_BYTES`, `VE_LE64`). Every other value is a JSON-shaped structured
//! value handed to a pluggable [`ValueCodec`]; the default is [`V8Codec`].

mod counter;
mod error;
mod v8;

use std::fmt;
use std::str::FromStr;

pub use counter::KvU64;
pub use error::ValueError;
pub use v8::V8Codec;

/// Serializer for structured values.
///
/// Implementations must at least round-trip `null` and may reject anything
/// they cannot represent.
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, ValueError>;

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, ValueError>;
}

/// Encoding tag stored next to every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ValueEncoding {
    /// Structured value, serialized by the active codec.
    V8 = 1,
    /// Little-endian `u64`.
    Le64 = 2,
    /// Raw bytes.
    Bytes = 3,
}

impl ValueEncoding {
    /// Name used when the tag is persisted as text.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueEncoding::V8 => "VE_V8",
            ValueEncoding::Le64 => "VE_LE64",
            ValueEncoding::Bytes => "VE_BYTES",
        }
    }

    #[inline]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Result<Self, ValueError> {
        match value {
            1 => Ok(ValueEncoding::V8),
            2 => Ok(ValueEncoding::Le64),
            3 => Ok(ValueEncoding::Bytes),
            other => Err(ValueError::UnknownEncoding(other.to_string())),
        }
    }
}

impl FromStr for ValueEncoding {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VE_V8" => Ok(ValueEncoding::V8),
            "VE_LE64" => Ok(ValueEncoding::Le64),
            "VE_BYTES" => Ok(ValueEncoding::Bytes),
            other => Err(ValueError::UnknownEncoding(other.to_string())),
        }
    }
}

impl fmt::Display for ValueEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value as the application sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    Bytes(Vec<u8>),
    U64(KvU64),
    Structured(serde_json::Value),
}

impl KvValue {
    #[inline]
    pub fn null() -> Self {
        KvValue::Structured(serde_json::Value::Null)
    }

    pub fn as_u64(&self) -> Option<KvU64> {
        match self {
            KvValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            KvValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            KvValue::Structured(v) => Some(v),
            _ => None,
        }
    }

    /// Encodes this value, delegating structured values to `codec`.
    pub fn encode(&self, codec: &dyn ValueCodec) -> Result<EncodedValue, ValueError> {
        let (encoding, data) = match self {
            KvValue::Bytes(bytes) => (ValueEncoding::Bytes, bytes.clone()),
            KvValue::U64(v) => (ValueEncoding::Le64, v.to_le_bytes().to_vec()),
            KvValue::Structured(v) => (ValueEncoding::V8, codec.encode(v)?),
        };
        Ok(EncodedValue { encoding, data })
    }

    /// Decodes stored bytes with their encoding tag.
    pub fn decode(
        encoding: ValueEncoding,
        data: &[u8],
        codec: &dyn ValueCodec,
    ) -> Result<Self, ValueError> {
        match encoding {
            ValueEncoding::Bytes => Ok(KvValue::Bytes(data.to_vec())),
            ValueEncoding::Le64 => KvU64::from_le_slice(data).map(KvValue::U64),
            ValueEncoding::V8 => codec.decode(data).map(KvValue::Structured),
        }
    }
}

impl From<KvU64> for KvValue {
    fn from(value: KvU64) -> Self {
        KvValue::U64(value)
    }
}

impl From<Vec<u8>> for KvValue {
    fn from(value: Vec<u8>) -> Self {
        KvValue::Bytes(value)
    }
}

impl From<serde_json::Value> for KvValue {
    fn from(value: serde_json::Value) -> Self {
        KvValue::Structured(value)
    }
}

impl From<&str> for KvValue {
    fn from(value: &str) -> Self {
        KvValue::Structured(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for KvValue {
    fn from(value: String) -> Self {
        KvValue::Structured(serde_json::Value::String(value))
    }
}

impl From<bool> for KvValue {
    fn from(value: bool) -> Self {
        KvValue::Structured(serde_json::Value::Bool(value))
    }
}

impl From<i64> for KvValue {
    fn from(value: i64) -> Self {
        KvValue::Structured(serde_json::Value::from(value))
    }
}

/// Encoded bytes together with their tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    pub encoding: ValueEncoding,
    pub data: Vec<u8>,
}
