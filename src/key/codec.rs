// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Order-preserving tuple key encoding.
//!
//! Each part is a typecode byte followed by a payload:
//!
//! | Part | Layout |
//! |---|---|
//! | bytes | `0x01` escaped bytes `0x00` |
//! | string | `0x02` escaped utf-8 `0x00` |
//! | negative integer | `0x0b` (long) or `0x0c..=0x13`, complemented magnitude |
//! | zero | `0x14` |
//! | positive integer | `0x15..=0x1c` or `0x1d` (long), magnitude |
//! | float64 | `0x21` big-endian bits of the negated value |
//! | false / true | `0x26` / `0x27` |
//!
//! Inside strings and byte strings a literal `0x00` is written as `0x00 0xff`,
//! so an unescaped `0x00` always terminates the part. Integers whose magnitude
//! needs more than eight bytes carry an extra length byte (`n`, or `0xff - n`
//! for negatives) so that longer magnitudes order correctly.
//!
//! Floats are stored negated. This keeps non-negative floats ordered but
//! inverts the order among negative floats; existing encoded keys depend on
//! this layout, so it is kept as is.

use super::{KeyError, KvBigInt, KvKey, KvKeyPart};

const BYTES: u8 = 0x01;
const STRING: u8 = 0x02;
const NEG_INT_LONG: u8 = 0x0b;
const NEG_INT_ONE: u8 = 0x13;
const INT_ZERO: u8 = 0x14;
const POS_INT_ONE: u8 = 0x15;
const POS_INT_LONG: u8 = 0x1d;
const FLOAT: u8 = 0x21;
const FALSE: u8 = 0x26;
const TRUE: u8 = 0x27;

const ESCAPE: u8 = 0xff;
const MAX_SHORT_INT_LEN: usize = 8;

/// Encodes a key into its order-preserving byte form.
///
/// The empty key encodes to an empty byte string.
pub fn pack_key(key: &KvKey) -> Result<Vec<u8>, KeyError> {
    let mut out = Vec::with_capacity(key.len() * 8);
    for part in key.parts() {
        encode_part(part, &mut out)?;
    }
    Ok(out)
}

/// Decodes a byte string produced by [`pack_key`].
pub fn unpack_key(bytes: &[u8]) -> Result<KvKey, KeyError> {
    let mut parts = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let (part, next) = decode_part(bytes, pos)?;
        parts.push(part);
        pos = next;
    }
    Ok(KvKey::new(parts))
}

/// Decodes exactly one key part, rejecting anything after it.
pub fn unpack_key_part(bytes: &[u8]) -> Result<KvKeyPart, KeyError> {
    let (part, next) = decode_part(bytes, 0)?;
    if next != bytes.len() {
        return Err(KeyError::TrailingBytes {
            remaining: bytes.len() - next,
        });
    }
    Ok(part)
}

fn encode_part(part: &KvKeyPart, out: &mut Vec<u8>) -> Result<(), KeyError> {
    match part {
        KvKeyPart::Bytes(bytes) => {
            out.push(BYTES);
            encode_escaped(bytes, out);
        }
        KvKeyPart::String(s) => {
            out.push(STRING);
            encode_escaped(s.as_bytes(), out);
        }
        KvKeyPart::Float(value) => {
            out.push(FLOAT);
            out.extend_from_slice(&(-value).to_be_bytes());
        }
        KvKeyPart::Bool(false) => out.push(FALSE),
        KvKeyPart::Bool(true) => out.push(TRUE),
        KvKeyPart::BigInt(value) => encode_int(value, out)?,
    }
    Ok(())
}

fn encode_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        out.push(b);
        if b == 0 {
            out.push(ESCAPE);
        }
    }
    out.push(0);
}

fn encode_int(value: &KvBigInt, out: &mut Vec<u8>) -> Result<(), KeyError> {
    let magnitude = value.magnitude();
    let n = magnitude.len();
    if n == 0 {
        out.push(INT_ZERO);
        return Ok(());
    }
    if n > usize::from(u8::MAX) {
        return Err(KeyError::IntegerTooLarge { bytes: n });
    }

    let negative = value.is_negative();
    if n <= MAX_SHORT_INT_LEN {
        let offset = (n - 1) as u8;
        out.push(if negative {
            NEG_INT_ONE - offset
        } else {
            POS_INT_ONE + offset
        });
    } else if negative {
        out.push(NEG_INT_LONG);
        out.push(u8::MAX - n as u8);
    } else {
        out.push(POS_INT_LONG);
        out.push(n as u8);
    }

    if negative {
        out.extend(magnitude.iter().map(|b| u8::MAX - b));
    } else {
        out.extend_from_slice(magnitude);
    }
    Ok(())
}

fn decode_part(bytes: &[u8], pos: usize) -> Result<(KvKeyPart, usize), KeyError> {
    let typecode = *bytes.get(pos).ok_or(KeyError::UnexpectedEnd { offset: pos })?;
    let body = pos + 1;

    match typecode {
        BYTES => {
            let (raw, next) = decode_escaped(bytes, body)?;
            Ok((KvKeyPart::Bytes(raw), next))
        }
        STRING => {
            let (raw, next) = decode_escaped(bytes, body)?;
            let s = String::from_utf8(raw).map_err(|_| KeyError::InvalidUtf8)?;
            Ok((KvKeyPart::String(s), next))
        }
        FLOAT => {
            let raw = take(bytes, body, 8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(raw);
            Ok((KvKeyPart::Float(-f64::from_be_bytes(buf)), body + 8))
        }
        FALSE => Ok((KvKeyPart::Bool(false), body)),
        TRUE => Ok((KvKeyPart::Bool(true), body)),
        INT_ZERO => Ok((KvKeyPart::BigInt(KvBigInt::zero()), body)),
        NEG_INT_LONG..=POS_INT_LONG => decode_int(bytes, typecode, body),
        _ => Err(KeyError::UnsupportedTypecode {
            typecode,
            offset: pos,
        }),
    }
}

fn decode_int(bytes: &[u8], typecode: u8, body: usize) -> Result<(KvKeyPart, usize), KeyError> {
    let negative = typecode < INT_ZERO;
    let (n, start) = match typecode {
        NEG_INT_LONG => {
            let len = take(bytes, body, 1)?[0];
            (usize::from(u8::MAX - len), body + 1)
        }
        POS_INT_LONG => {
            let len = take(bytes, body, 1)?[0];
            (usize::from(len), body + 1)
        }
        code if negative => (usize::from(NEG_INT_ONE - code) + 1, body),
        code => (usize::from(code - POS_INT_ONE) + 1, body),
    };

    let raw = take(bytes, start, n)?;
    let magnitude: Vec<u8> = if negative {
        raw.iter().map(|b| u8::MAX - b).collect()
    } else {
        raw.to_vec()
    };
    Ok((
        KvKeyPart::BigInt(KvBigInt::from_sign_magnitude(negative, &magnitude)),
        start + n,
    ))
}

fn decode_escaped(bytes: &[u8], mut pos: usize) -> Result<(Vec<u8>, usize), KeyError> {
    let mut out = Vec::new();
    loop {
        let b = *bytes.get(pos).ok_or(KeyError::UnexpectedEnd { offset: pos })?;
        pos += 1;
        if b != 0 {
            out.push(b);
            continue;
        }
        if bytes.get(pos) == Some(&ESCAPE) {
            out.push(0);
            pos += 1;
        } else {
            return Ok((out, pos));
        }
    }
}

#[inline]
fn take(bytes: &[u8], pos: usize, len: usize) -> Result<&[u8], KeyError> {
    bytes
        .get(pos..pos + len)
        .ok_or(KeyError::UnexpectedEnd { offset: bytes.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_key;

    fn packed(key: KvKey) -> Vec<u8> {
        pack_key(&key).unwrap()
    }

    #[test]
    fn test_string_vectors() {
        assert_eq!(packed(kv_key!["foo"]), vec![2, 102, 111, 111, 0]);
        assert_eq!(packed(kv_key!["f\0o"]), vec![2, 102, 0, 0xff, 111, 0]);
    }

    #[test]
    fn test_bytes_vectors() {
        assert_eq!(packed(kv_key![b"foo"]), vec![1, 102, 111, 111, 0]);
        assert_eq!(packed(kv_key![vec![4u8, 0, 4]]), vec![1, 4, 0, 255, 4, 0]);
    }

    #[test]
    fn test_float_vectors() {
        assert_eq!(
            packed(kv_key![123.456f64]),
            vec![33, 192, 94, 221, 47, 26, 159, 190, 119]
        );
        assert_eq!(packed(kv_key![200.0f64]), vec![33, 192, 105, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_bool_vectors() {
        assert_eq!(packed(kv_key![false]), vec![38]);
        assert_eq!(packed(kv_key![true]), vec![39]);
    }

    #[test]
    fn test_integer_vectors() {
        let cases: &[(i64, &[u8])] = &[
            (0, &[20]),
            (-200, &[19, 55]),
            (200, &[21, 200]),
            (600, &[22, 2, 88]),
            (70000, &[23, 1, 17, 112]),
            (305419896, &[24, 18, 52, 86, 120]),
            (78187493520, &[25, 18, 52, 86, 120, 144]),
        ];
        for (value, expected) in cases {
            assert_eq!(packed(kv_key![*value]), expected.to_vec(), "value {value}");
        }
    }

    #[test]
    fn test_long_integers() {
        let big: KvBigInt = "1208925819614629174706176".parse().unwrap(); // 2^80
        let encoded = packed(KvKey::new(vec![KvKeyPart::BigInt(big.clone())]));
        assert_eq!(encoded[0], 0x1d);
        assert_eq!(encoded[1], 11);
        assert_eq!(encoded.len(), 2 + 11);
        assert_eq!(
            unpack_key(&encoded).unwrap(),
            KvKey::new(vec![KvKeyPart::BigInt(big)])
        );

        let neg: KvBigInt = "-1208925819614629174706176".parse().unwrap();
        let encoded = packed(KvKey::new(vec![KvKeyPart::BigInt(neg.clone())]));
        assert_eq!(encoded[0], 0x0b);
        assert_eq!(encoded[1], 0xff - 11);
        assert_eq!(
            unpack_key(&encoded).unwrap(),
            KvKey::new(vec![KvKeyPart::BigInt(neg)])
        );
    }

    #[test]
    fn test_eight_byte_boundaries() {
        let max = packed(kv_key![u64::MAX]);
        assert_eq!(max[0], 0x1c);
        let min = packed(kv_key![i64::MIN]);
        assert_eq!(min[0], 0x0c);
        assert!(min < packed(kv_key![-1i64]));
    }

    #[test]
    fn test_integer_too_large() {
        let magnitude = vec![1u8; 256];
        let key = KvKey::new(vec![KvKeyPart::BigInt(KvBigInt::from_sign_magnitude(
            false, &magnitude,
        ))]);
        assert_eq!(
            pack_key(&key),
            Err(KeyError::IntegerTooLarge { bytes: 256 })
        );
    }

    #[test]
    fn test_composite_round_trip() {
        let key = kv_key!["users", 42i64, true, b"\x00\x01", 1.5f64, -7i64];
        assert_eq!(unpack_key(&packed(key.clone())).unwrap(), key);
    }

    #[test]
    fn test_empty_key() {
        assert!(packed(KvKey::default()).is_empty());
        assert!(unpack_key(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_typecode() {
        assert_eq!(
            unpack_key(&[0x30]),
            Err(KeyError::UnsupportedTypecode {
                typecode: 0x30,
                offset: 0
            })
        );
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(
            unpack_key(&[2, 102, 111]),
            Err(KeyError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            unpack_key(&[0x21, 0, 0]),
            Err(KeyError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            unpack_key(&[0x16, 2]),
            Err(KeyError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(unpack_key(&[2, 0xc3, 0x28, 0]), Err(KeyError::InvalidUtf8));
    }

    #[test]
    fn test_single_part_trailing_bytes() {
        assert_eq!(
            unpack_key_part(&[0x27, 0x26]),
            Err(KeyError::TrailingBytes { remaining: 1 })
        );
        assert_eq!(unpack_key_part(&[0x27]).unwrap(), KvKeyPart::Bool(true));
    }

    #[test]
    fn test_type_ordering() {
        let ordered = [
            packed(kv_key![b"a"]),
            packed(kv_key!["a"]),
            packed(kv_key![-1i64]),
            packed(kv_key![0i64]),
            packed(kv_key![1i64]),
            packed(kv_key![1.0f64]),
            packed(kv_key![false]),
            packed(kv_key![true]),
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{:?} !< {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_prefix_sorts_first() {
        assert!(packed(kv_key!["a"]) < packed(kv_key!["a", "a"]));
        assert!(packed(kv_key!["a", "b"]) < packed(kv_key!["b"]));
        assert!(packed(kv_key!["a"]) < packed(kv_key!["a\0"]));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn int_part() -> impl Strategy<Value = KvBigInt> {
        prop_oneof![
            any::<i64>().prop_map(KvBigInt::from),
            any::<i128>().prop_map(KvBigInt::from),
            (any::<bool>(), proptest::collection::vec(any::<u8>(), 0..40))
                .prop_map(|(neg, mag)| KvBigInt::from_sign_magnitude(neg, &mag)),
        ]
    }

    fn key_part() -> impl Strategy<Value = KvKeyPart> {
        prop_oneof![
            proptest::collection::vec(any::<u8>(), 0..24).prop_map(KvKeyPart::Bytes),
            ".{0,16}".prop_map(KvKeyPart::String),
            (0.0f64..1.0e12).prop_map(KvKeyPart::Float),
            any::<bool>().prop_map(KvKeyPart::Bool),
            int_part().prop_map(KvKeyPart::BigInt),
        ]
    }

    fn key() -> impl Strategy<Value = KvKey> {
        proptest::collection::vec(key_part(), 0..5).prop_map(KvKey::new)
    }

    proptest! {
        #[test]
        fn prop_round_trip(key in key()) {
            let encoded = pack_key(&key).unwrap();
            prop_assert_eq!(unpack_key(&encoded).unwrap(), key);
        }

        #[test]
        fn prop_integer_order(a in int_part(), b in int_part()) {
            let ea = pack_key(&KvKey::new(vec![KvKeyPart::BigInt(a.clone())])).unwrap();
            let eb = pack_key(&KvKey::new(vec![KvKeyPart::BigInt(b.clone())])).unwrap();
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
        }

        #[test]
        fn prop_string_order(a in ".{0,12}", b in ".{0,12}") {
            let ea = pack_key(&KvKey::new(vec![KvKeyPart::from(a.as_str())])).unwrap();
            let eb = pack_key(&KvKey::new(vec![KvKeyPart::from(b.as_str())])).unwrap();
            prop_assert_eq!(a.as_bytes().cmp(b.as_bytes()), ea.cmp(&eb));
        }

        #[test]
        fn prop_bytes_order(
            a in proptest::collection::vec(any::<u8>(), 0..12),
            b in proptest::collection::vec(any::<u8>(), 0..12),
        ) {
            let ea = pack_key(&KvKey::new(vec![KvKeyPart::Bytes(a.clone())])).unwrap();
            let eb = pack_key(&KvKey::new(vec![KvKeyPart::Bytes(b.clone())])).unwrap();
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
        }

        #[test]
        fn prop_non_negative_float_order(a in 0.0f64..1.0e300, b in 0.0f64..1.0e300) {
            let ea = pack_key(&KvKey::new(vec![KvKeyPart::Float(a)])).unwrap();
            let eb = pack_key(&KvKey::new(vec![KvKeyPart::Float(b)])).unwrap();
            prop_assert_eq!(a.partial_cmp(&b).unwrap(), ea.cmp(&eb));
        }

        #[test]
        fn prop_tuple_order(
            head in ".{0,6}",
            a in any::<i64>(),
            b in any::<i64>(),
        ) {
            let ka = KvKey::new(vec![KvKeyPart::from(head.as_str()), KvKeyPart::from(a)]);
            let kb = KvKey::new(vec![KvKeyPart::from(head.as_str()), KvKeyPart::from(b)]);
            prop_assert_eq!(a.cmp(&b), pack_key(&ka).unwrap().cmp(&pack_key(&kb).unwrap()));
        }
    }
}
