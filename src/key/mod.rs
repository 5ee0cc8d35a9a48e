// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Tuple keys and their order-preserving byte encoding.
//!
//! A [`KvKey`] is an ordered list of typed [`KvKeyPart`]s. Keys are never
//! compared structurally; the engine orders them by their packed byte form,
//! which sorts the same way the tuples do.
//!
//! # Example
//!
//! ```
//! use tuplekv::{kv_key, pack_key, unpack_key};
//!
//! let key = kv_key!["users", 42i64, true];
//! let bytes = pack_key(&key).unwrap();
//! assert_eq!(unpack_key(&bytes).unwrap(), key);
//! assert!(pack_key(&kv_key!["users", 41i64]).unwrap() < bytes);
//! ```

mod bigint;
mod codec;
mod error;

use std::fmt;

pub use bigint::{KvBigInt, ParseBigIntError};
pub use codec::{pack_key, unpack_key, unpack_key_part};
pub use error::KeyError;

/// One typed element of a composite key.
#[derive(Debug, Clone, PartialEq)]
pub enum KvKeyPart {
    Bytes(Vec<u8>),
    String(String),
    Float(f64),
    Bool(bool),
    BigInt(KvBigInt),
}

impl fmt::Display for KvKeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvKeyPart::Bytes(bytes) => write!(f, "b\"{}\"", bytes.escape_ascii()),
            KvKeyPart::String(s) => write!(f, "{s:?}"),
            KvKeyPart::Float(v) => write!(f, "{v:?}"),
            KvKeyPart::Bool(v) => write!(f, "{v}"),
            KvKeyPart::BigInt(v) => write!(f, "{v}n"),
        }
    }
}

impl From<&str> for KvKeyPart {
    fn from(value: &str) -> Self {
        KvKeyPart::String(value.to_string())
    }
}

impl From<String> for KvKeyPart {
    fn from(value: String) -> Self {
        KvKeyPart::String(value)
    }
}

impl From<&String> for KvKeyPart {
    fn from(value: &String) -> Self {
        KvKeyPart::String(value.clone())
    }
}

impl From<Vec<u8>> for KvKeyPart {
    fn from(value: Vec<u8>) -> Self {
        KvKeyPart::Bytes(value)
    }
}

impl From<&[u8]> for KvKeyPart {
    fn from(value: &[u8]) -> Self {
        KvKeyPart::Bytes(value.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for KvKeyPart {
    fn from(value: &[u8; N]) -> Self {
        KvKeyPart::Bytes(value.to_vec())
    }
}

impl From<f64> for KvKeyPart {
    fn from(value: f64) -> Self {
        KvKeyPart::Float(value)
    }
}

impl From<bool> for KvKeyPart {
    fn from(value: bool) -> Self {
        KvKeyPart::Bool(value)
    }
}

impl From<KvBigInt> for KvKeyPart {
    fn from(value: KvBigInt) -> Self {
        KvKeyPart::BigInt(value)
    }
}

macro_rules! impl_int_part {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for KvKeyPart {
                fn from(value: $ty) -> Self {
                    KvKeyPart::BigInt(KvBigInt::from(value))
                }
            }
        )*
    };
}

impl_int_part!(i8, i16, i32, i64, i128, u8, u16, u32, u64, u128);

/// Ordered sequence of key parts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KvKey(Vec<KvKeyPart>);

impl KvKey {
    /// Creates a key from its parts.
    #[inline]
    pub fn new(parts: Vec<KvKeyPart>) -> Self {
        Self(parts)
    }

    #[inline]
    pub fn parts(&self) -> &[KvKeyPart] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy of this key with one more part appended.
    pub fn child(&self, part: impl Into<KvKeyPart>) -> Self {
        let mut parts = self.0.clone();
        parts.push(part.into());
        Self(parts)
    }

    /// Returns true if `prefix` is a leading subsequence of this key.
    pub fn starts_with(&self, prefix: &KvKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Packs this key into bytes.
    #[inline]
    pub fn pack(&self) -> Result<Vec<u8>, KeyError> {
        pack_key(self)
    }

    pub fn into_parts(self) -> Vec<KvKeyPart> {
        self.0
    }
}

impl From<Vec<KvKeyPart>> for KvKey {
    fn from(parts: Vec<KvKeyPart>) -> Self {
        Self(parts)
    }
}

impl FromIterator<KvKeyPart> for KvKey {
    fn from_iter<I: IntoIterator<Item = KvKeyPart>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for KvKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{part}")?;
        }
        f.write_str("]")
    }
}

/// Builds a [`KvKey`] from values convertible into [`KvKeyPart`].
///
/// ```
/// use tuplekv::{kv_key, KvKeyPart};
///
/// let key = kv_key!["a", 1i64, b"raw"];
/// assert_eq!(key.parts()[0], KvKeyPart::String("a".into()));
/// ```
#[macro_export]
macro_rules! kv_key {
    () => {
        $crate::KvKey::default()
    };
    ($($part:expr),+ $(,)?) => {
        $crate::KvKey::new(vec![$($crate::KvKeyPart::from($part)),+])
    };
}
