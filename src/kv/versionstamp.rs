// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Commit versionstamps.

use std::fmt;
use std::str::FromStr;

use super::KvError;

/// Width of a formatted versionstamp.
pub const VERSIONSTAMP_LEN: usize = 20;

/// Largest commit counter that fits the 16-digit local form.
pub const MAX_LOCAL_VERSION: u64 = 9_999_999_999_999_999;

/// Fixed-width token stamped on every row written by a commit.
///
/// Local stores format a commit counter as 16 zero-padded decimal digits
/// followed by `0000`; the remote backend renders the 10 raw bytes it
/// receives as lowercase hex. Both forms compare lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Versionstamp(String);

impl Versionstamp {
    /// Formats a local commit counter.
    ///
    /// Fails with [`KvError::VersionExhausted`] past [`MAX_LOCAL_VERSION`].
    pub fn from_version(version: u64) -> Result<Self, KvError> {
        if version > MAX_LOCAL_VERSION {
            return Err(KvError::VersionExhausted(version));
        }
        Ok(Self(format!("{version:016}0000")))
    }

    /// Formats the 10-byte form used on the wire.
    pub fn from_bytes(bytes: &[u8; 10]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Parses and validates a formatted versionstamp.
    pub fn parse(s: &str) -> Result<Self, KvError> {
        let valid = s.len() == VERSIONSTAMP_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(KvError::InvalidVersionstamp(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The 10-byte wire form.
    pub fn to_bytes(&self) -> [u8; 10] {
        let mut out = [0u8; 10];
        // Always 20 hex digits once constructed.
        if hex::decode_to_slice(&self.0, &mut out).is_err() {
            out = [0u8; 10];
        }
        out
    }

    /// Commit counter for locally issued versionstamps.
    pub fn version(&self) -> Option<u64> {
        self.0
            .strip_suffix("0000")
            .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Versionstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Versionstamp {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Versionstamp {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_format() {
        let vs = Versionstamp::from_version(1).unwrap();
        assert_eq!(vs.as_str(), "00000000000000010000");
        assert_eq!(vs.as_str().len(), VERSIONSTAMP_LEN);
        assert_eq!(vs.version(), Some(1));
    }

    #[test]
    fn test_monotonic_ordering() {
        let stamps: Vec<Versionstamp> = [1u64, 2, 9, 10, 99, 100, 12345]
            .iter()
            .map(|v| Versionstamp::from_version(*v).unwrap())
            .collect();
        for pair in stamps.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_local_counter_bound() {
        let last = Versionstamp::from_version(MAX_LOCAL_VERSION).unwrap();
        assert_eq!(last.as_str(), "99999999999999990000");
        assert_eq!(last.version(), Some(MAX_LOCAL_VERSION));
        assert!(Versionstamp::from_version(MAX_LOCAL_VERSION - 1).unwrap() < last);
        assert!(matches!(
            Versionstamp::from_version(MAX_LOCAL_VERSION + 1),
            Err(KvError::VersionExhausted(_))
        ));
        assert!(Versionstamp::from_version(u64::MAX).is_err());
    }

    #[test]
    fn test_wire_form() {
        let bytes = [0, 0, 0, 0, 0, 0, 0, 1, 0xab, 0];
        let vs = Versionstamp::from_bytes(&bytes);
        assert_eq!(vs.as_str(), "0000000000000001ab00");
        assert_eq!(vs.to_bytes(), bytes);
        assert_eq!(vs.version(), None);
    }

    #[test]
    fn test_parse_validation() {
        assert!(Versionstamp::parse("00000000000000010000").is_ok());
        assert!(Versionstamp::parse("0000000000000001").is_err());
        assert!(Versionstamp::parse("0000000000000001000G").is_err());
        assert!(Versionstamp::parse("0000000000000001000A").is_err());
        assert!(Versionstamp::parse("").is_err());
    }
}
