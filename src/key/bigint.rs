// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Arbitrary precision signed integers for key parts.
//!
//! Keys only need to carry integers, compare them and print them, so the
//! representation is a sign flag plus a big-endian magnitude with no leading
//! zero bytes. Zero is the empty magnitude and is never negative.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Signed integer of unbounded width.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KvBigInt {
    negative: bool,
    magnitude: Vec<u8>,
}

impl KvBigInt {
    /// Returns zero.
    #[inline]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Builds an integer from a sign and a big-endian magnitude.
    ///
    /// Leading zero bytes are stripped and a negative zero becomes zero.
    pub fn from_sign_magnitude(negative: bool, magnitude: &[u8]) -> Self {
        let start = magnitude
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(magnitude.len());
        let magnitude = magnitude[start..].to_vec();
        let negative = negative && !magnitude.is_empty();
        Self { negative, magnitude }
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.magnitude.is_empty()
    }

    /// Big-endian magnitude without leading zeros.
    #[inline]
    pub fn magnitude(&self) -> &[u8] {
        &self.magnitude
    }

    /// Number of bytes needed to hold the magnitude.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.magnitude.len()
    }

    /// Converts to `i128` when the value fits.
    pub fn to_i128(&self) -> Option<i128> {
        if self.magnitude.len() > 16 {
            return None;
        }
        let mut buf = [0u8; 16];
        buf[16 - self.magnitude.len()..].copy_from_slice(&self.magnitude);
        let abs = u128::from_be_bytes(buf);
        if self.negative {
            if abs == 1u128 << 127 {
                Some(i128::MIN)
            } else {
                i128::try_from(abs).ok().map(|v| -v)
            }
        } else {
            i128::try_from(abs).ok()
        }
    }

    /// Converts to `i64` when the value fits.
    pub fn to_i64(&self) -> Option<i64> {
        self.to_i128().and_then(|v| i64::try_from(v).ok())
    }

    /// Converts to `u64` when the value is non-negative and fits.
    pub fn to_u64(&self) -> Option<u64> {
        self.to_i128().and_then(|v| u64::try_from(v).ok())
    }
}

fn strip_leading_zeros(bytes: &mut Vec<u8>) {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes.drain(..start);
}

fn compare_magnitude(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl Ord for KvBigInt {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => compare_magnitude(&self.magnitude, &other.magnitude),
            (true, true) => compare_magnitude(&other.magnitude, &self.magnitude),
        }
    }
}

impl PartialOrd for KvBigInt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<u128> for KvBigInt {
    fn from(value: u128) -> Self {
        Self::from_sign_magnitude(false, &value.to_be_bytes())
    }
}

impl From<i128> for KvBigInt {
    fn from(value: i128) -> Self {
        Self::from_sign_magnitude(value < 0, &value.unsigned_abs().to_be_bytes())
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $wide:ty),* $(,)?) => {
        $(
            impl From<$ty> for KvBigInt {
                fn from(value: $ty) -> Self {
                    Self::from(<$wide>::from(value))
                }
            }
        )*
    };
}

impl_from_primitive!(i8 => i128, i16 => i128, i32 => i128, i64 => i128);
impl_from_primitive!(u8 => u128, u16 => u128, u32 => u128, u64 => u128);

impl fmt::Display for KvBigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }

        let mut digits = Vec::new();
        let mut current = self.magnitude.clone();
        while !current.is_empty() {
            let mut remainder = 0u32;
            for byte in current.iter_mut() {
                let acc = (remainder << 8) | u32::from(*byte);
                *byte = (acc / 10) as u8;
                remainder = acc % 10;
            }
            digits.push(b'0' + remainder as u8);
            strip_leading_zeros(&mut current);
        }

        if self.negative {
            f.write_str("-")?;
        }
        digits.reverse();
        f.write_str(&String::from_utf8_lossy(&digits))
    }
}

/// Error returned when parsing a decimal integer fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid integer literal: {0:?}")]
pub struct ParseBigIntError(String);

impl FromStr for KvBigInt {
    type Err = ParseBigIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseBigIntError(s.to_string()));
        }

        // Little-endian while accumulating, flipped at the end.
        let mut magnitude: Vec<u8> = Vec::new();
        for digit in digits.bytes() {
            let mut carry = u32::from(digit - b'0');
            for byte in magnitude.iter_mut() {
                let acc = u32::from(*byte) * 10 + carry;
                *byte = (acc & 0xff) as u8;
                carry = acc >> 8;
            }
            while carry > 0 {
                magnitude.push((carry & 0xff) as u8);
                carry >>= 8;
            }
        }
        magnitude.reverse();

        Ok(Self::from_sign_magnitude(negative, &magnitude))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_normalized() {
        let zero = KvBigInt::from_sign_magnitude(true, &[0, 0]);
        assert!(zero.is_zero());
        assert!(!zero.is_negative());
        assert_eq!(zero, KvBigInt::zero());
    }

    #[test]
    fn test_from_primitive() {
        let v = KvBigInt::from(600i64);
        assert_eq!(v.magnitude(), &[2, 88]);
        assert!(!v.is_negative());

        let v = KvBigInt::from(-200i32);
        assert_eq!(v.magnitude(), &[200]);
        assert!(v.is_negative());

        let v = KvBigInt::from(u64::MAX);
        assert_eq!(v.byte_len(), 8);
    }

    #[test]
    fn test_i128_extremes() {
        assert_eq!(KvBigInt::from(i128::MIN).to_i128(), Some(i128::MIN));
        assert_eq!(KvBigInt::from(i128::MAX).to_i128(), Some(i128::MAX));
        assert_eq!(KvBigInt::from(u128::MAX).to_i128(), None);
        assert_eq!(KvBigInt::from(-1i64).to_u64(), None);
    }

    #[test]
    fn test_ordering() {
        let mut values: Vec<KvBigInt> = [-70000i64, -256, -1, 0, 1, 255, 256, 70000]
            .iter()
            .map(|v| KvBigInt::from(*v))
            .collect();
        let sorted = values.clone();
        values.reverse();
        values.sort();
        assert_eq!(values, sorted);
    }

    #[test]
    fn test_display_and_parse() {
        for literal in ["0", "7", "-200", "78187493520", "-340282366920938463463374607431768211457"] {
            let parsed: KvBigInt = literal.parse().unwrap();
            assert_eq!(parsed.to_string(), literal);
        }
        assert!("".parse::<KvBigInt>().is_err());
        assert!("12a".parse::<KvBigInt>().is_err());
        assert!("-".parse::<KvBigInt>().is_err());
    }

    #[test]
    fn test_parse_wide_value() {
        let parsed: KvBigInt = "340282366920938463463374607431768211456".parse().unwrap();
        // 2^128
        let mut expected = vec![1u8];
        expected.extend_from_slice(&[0u8; 16]);
        assert_eq!(parsed.magnitude(), expected.as_slice());
    }
}
