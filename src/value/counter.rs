// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Unsigned 64-bit counter values.

use std::fmt;

use super::ValueError;

/// Immutable unsigned 64-bit integer stored with the `VE_LE64` encoding.
///
/// Only values of this type take part in `sum`, `min` and `max` mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct KvU64(u64);

impl KvU64 {
    #[inline]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Adds `other`, wrapping modulo 2^64.
    #[inline]
    pub const fn sum(self, other: KvU64) -> KvU64 {
        KvU64(self.0.wrapping_add(other.0))
    }

    /// Returns the smaller of the two values.
    #[inline]
    pub fn min(self, other: KvU64) -> KvU64 {
        KvU64(self.0.min(other.0))
    }

    /// Returns the larger of the two values.
    #[inline]
    pub fn max(self, other: KvU64) -> KvU64 {
        KvU64(self.0.max(other.0))
    }

    /// Little-endian storage form.
    #[inline]
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Decodes the little-endian storage form.
    pub fn from_le_slice(bytes: &[u8]) -> Result<Self, ValueError> {
        let buf: [u8; 8] = bytes
            .try_into()
            .map_err(|_| ValueError::InvalidLe64Length(bytes.len()))?;
        Ok(Self(u64::from_le_bytes(buf)))
    }
}

impl From<u64> for KvU64 {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<u32> for KvU64 {
    fn from(value: u32) -> Self {
        Self(u64::from(value))
    }
}

impl TryFrom<i64> for KvU64 {
    type Error = ValueError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u64::try_from(value)
            .map(Self)
            .map_err(|_| ValueError::U64OutOfRange(value.to_string()))
    }
}

impl TryFrom<i128> for KvU64 {
    type Error = ValueError;

    fn try_from(value: i128) -> Result<Self, Self::Error> {
        u64::try_from(value)
            .map(Self)
            .map_err(|_| ValueError::U64OutOfRange(value.to_string()))
    }
}

impl TryFrom<&crate::key::KvBigInt> for KvU64 {
    type Error = ValueError;

    fn try_from(value: &crate::key::KvBigInt) -> Result<Self, Self::Error> {
        value
            .to_u64()
            .map(Self)
            .ok_or_else(|| ValueError::U64OutOfRange(value.to_string()))
    }
}

impl fmt::Display for KvU64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
