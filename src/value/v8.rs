// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Legacy structured value serializer.
//!
//! Writes and reads the V8 value-serializer wire format (version 15) for the
//! JSON-shaped subset of values: null, booleans, numbers, strings, arrays and
//! plain objects. Anything else found while decoding is rejected.

use serde_json::{Map, Number, Value};

use super::{ValueCodec, ValueError};

const FORMAT_VERSION: u64 = 15;
const MAX_DEPTH: usize = 256;

mod tag {
    pub const VERSION: u8 = 0xff;
    pub const PADDING: u8 = 0x00;
    pub const VERIFY_OBJECT_COUNT: u8 = b'?';
    pub const UNDEFINED: u8 = b'_';
    pub const NULL: u8 = b'0';
    pub const TRUE: u8 = b'T';
    pub const FALSE: u8 = b'F';
    pub const INT32: u8 = b'I';
    pub const UINT32: u8 = b'U';
    pub const DOUBLE: u8 = b'N';
    pub const ONE_BYTE_STRING: u8 = b'"';
    pub const TWO_BYTE_STRING: u8 = b'c';
    pub const UTF8_STRING: u8 = b'S';
    pub const BEGIN_OBJECT: u8 = b'o';
    pub const END_OBJECT: u8 = b'{';
    pub const BEGIN_DENSE_ARRAY: u8 = b'A';
    pub const END_DENSE_ARRAY: u8 = b'$';
    pub const BEGIN_SPARSE_ARRAY: u8 = b'a';
    pub const END_SPARSE_ARRAY: u8 = b'@';
    pub const THE_HOLE: u8 = b'-';
}

/// Default codec for structured values.
#[derive(Debug, Clone, Copy, Default)]
pub struct V8Codec;

impl ValueCodec for V8Codec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, ValueError> {
        let mut writer = Writer { buf: Vec::with_capacity(16) };
        writer.buf.push(tag::VERSION);
        writer.write_varint(FORMAT_VERSION);
        writer.write_value(value, 0)?;
        Ok(writer.buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, ValueError> {
        let mut reader = Reader { buf: bytes, pos: 0 };
        reader.read_header()?;
        reader.read_value(0)
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    fn write_value(&mut self, value: &Value, depth: usize) -> Result<(), ValueError> {
        if depth > MAX_DEPTH {
            return Err(ValueError::Unsupported("value nesting too deep".to_string()));
        }
        match value {
            Value::Null => self.buf.push(tag::NULL),
            Value::Bool(true) => self.buf.push(tag::TRUE),
            Value::Bool(false) => self.buf.push(tag::FALSE),
            Value::Number(n) => self.write_number(n)?,
            Value::String(s) => self.write_string(s),
            Value::Array(items) => {
                self.buf.push(tag::BEGIN_DENSE_ARRAY);
                self.write_varint(items.len() as u64);
                for item in items {
                    self.write_value(item, depth + 1)?;
                }
                self.buf.push(tag::END_DENSE_ARRAY);
                self.write_varint(0);
                self.write_varint(items.len() as u64);
            }
            Value::Object(map) => {
                self.buf.push(tag::BEGIN_OBJECT);
                for (key, item) in map {
                    self.write_string(key);
                    self.write_value(item, depth + 1)?;
                }
                self.buf.push(tag::END_OBJECT);
                self.write_varint(map.len() as u64);
            }
        }
        Ok(())
    }

    fn write_number(&mut self, n: &Number) -> Result<(), ValueError> {
        if let Some(small) = n.as_i64().and_then(|v| i32::try_from(v).ok()) {
            self.buf.push(tag::INT32);
            let zigzag = ((small << 1) ^ (small >> 31)) as u32;
            self.write_varint(u64::from(zigzag));
            return Ok(());
        }
        let double = n
            .as_f64()
            .ok_or_else(|| ValueError::Unsupported(format!("number {n}")))?;
        self.buf.push(tag::DOUBLE);
        self.buf.extend_from_slice(&double.to_le_bytes());
        Ok(())
    }

    fn write_string(&mut self, s: &str) {
        if s.chars().all(|c| u32::from(c) <= 0xff) {
            self.buf.push(tag::ONE_BYTE_STRING);
            self.write_varint(s.chars().count() as u64);
            self.buf.extend(s.chars().map(|c| u32::from(c) as u8));
            return;
        }

        let units: Vec<u16> = s.encode_utf16().collect();
        let byte_len = (units.len() * 2) as u64;
        // Two-byte payloads start on an even offset.
        if (self.buf.len() + 1 + varint_len(byte_len)) % 2 == 1 {
            self.buf.push(tag::PADDING);
        }
        self.buf.push(tag::TWO_BYTE_STRING);
        self.write_varint(byte_len);
        for unit in units {
            self.buf.extend_from_slice(&unit.to_le_bytes());
        }
    }
}

fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn malformed(&self, what: &str) -> ValueError {
        ValueError::Malformed(format!("{what} at offset {}", self.pos))
    }

    fn read_byte(&mut self) -> Result<u8, ValueError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| self.malformed("unexpected end of data"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ValueError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| self.malformed("unexpected end of data"))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_varint(&mut self) -> Result<u64, ValueError> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            if shift > 63 {
                return Err(self.malformed("varint overflow"));
            }
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn read_len(&mut self) -> Result<usize, ValueError> {
        usize::try_from(self.read_varint()?).map_err(|_| self.malformed("length overflow"))
    }

    fn read_header(&mut self) -> Result<(), ValueError> {
        if self.read_byte()? != tag::VERSION {
            return Err(self.malformed("missing version header"));
        }
        let version = self.read_varint()?;
        if version > FORMAT_VERSION {
            return Err(ValueError::Malformed(format!(
                "unsupported serializer version {version}"
            )));
        }
        Ok(())
    }

    /// Next tag, skipping padding and object-count hints.
    fn read_tag(&mut self) -> Result<u8, ValueError> {
        loop {
            match self.read_byte()? {
                tag::PADDING => continue,
                tag::VERIFY_OBJECT_COUNT => {
                    self.read_varint()?;
                }
                other => return Ok(other),
            }
        }
    }

    fn peek_tag(&mut self) -> Result<u8, ValueError> {
        let saved = self.pos;
        let found = self.read_tag()?;
        self.pos = saved;
        Ok(found)
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, ValueError> {
        if depth > MAX_DEPTH {
            return Err(self.malformed("value nesting too deep"));
        }
        let found = self.read_tag()?;
        match found {
            tag::UNDEFINED | tag::NULL | tag::THE_HOLE => Ok(Value::Null),
            tag::TRUE => Ok(Value::Bool(true)),
            tag::FALSE => Ok(Value::Bool(false)),
            tag::INT32 => {
                let raw = self.read_varint()? as u32;
                let value = ((raw >> 1) as i32) ^ -((raw & 1) as i32);
                Ok(Value::Number(Number::from(value)))
            }
            tag::UINT32 => {
                let raw = self.read_varint()? as u32;
                Ok(Value::Number(Number::from(raw)))
            }
            tag::DOUBLE => {
                let raw = self.read_bytes(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                number_from_f64(f64::from_le_bytes(buf)).map(Value::Number)
            }
            tag::ONE_BYTE_STRING | tag::TWO_BYTE_STRING | tag::UTF8_STRING => {
                self.read_string_body(found).map(Value::String)
            }
            tag::BEGIN_OBJECT => self.read_object(depth),
            tag::BEGIN_DENSE_ARRAY => self.read_dense_array(depth),
            tag::BEGIN_SPARSE_ARRAY => self.read_sparse_array(depth),
            other => Err(ValueError::Unsupported(format!(
                "serialization tag 0x{other:02x}"
            ))),
        }
    }

    fn read_string_body(&mut self, kind: u8) -> Result<String, ValueError> {
        let len = self.read_len()?;
        let raw = self.read_bytes(len)?;
        match kind {
            tag::ONE_BYTE_STRING => Ok(raw.iter().map(|b| char::from(*b)).collect()),
            tag::TWO_BYTE_STRING => {
                if len % 2 != 0 {
                    return Err(self.malformed("odd two-byte string length"));
                }
                let units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units).map_err(|_| self.malformed("invalid utf-16"))
            }
            _ => String::from_utf8(raw.to_vec()).map_err(|_| self.malformed("invalid utf-8")),
        }
    }

    fn read_property_key(&mut self, depth: usize) -> Result<String, ValueError> {
        match self.read_value(depth + 1)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(self.malformed("invalid property key")),
        }
    }

    fn read_object(&mut self, depth: usize) -> Result<Value, ValueError> {
        let mut map = Map::new();
        loop {
            if self.peek_tag()? == tag::END_OBJECT {
                self.read_tag()?;
                let count = self.read_len()?;
                if count != map.len() {
                    return Err(self.malformed("object property count mismatch"));
                }
                return Ok(Value::Object(map));
            }
            let key = self.read_property_key(depth)?;
            let value = self.read_value(depth + 1)?;
            map.insert(key, value);
        }
    }

    fn read_dense_array(&mut self, depth: usize) -> Result<Value, ValueError> {
        let len = self.read_len()?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.read_value(depth + 1)?);
        }
        // Extra named properties on arrays have no JSON form and are dropped.
        loop {
            if self.peek_tag()? == tag::END_DENSE_ARRAY {
                self.read_tag()?;
                self.read_len()?;
                let length = self.read_len()?;
                if length != len {
                    return Err(self.malformed("dense array length mismatch"));
                }
                return Ok(Value::Array(items));
            }
            self.read_property_key(depth)?;
            self.read_value(depth + 1)?;
        }
    }

    fn read_sparse_array(&mut self, depth: usize) -> Result<Value, ValueError> {
        let len = self.read_len()?;
        // Holes take no input bytes; the declared length may not exceed what remains.
        if len > self.buf.len() - self.pos {
            return Err(self.malformed("sparse array length exceeds input"));
        }
        let mut items = Vec::new();
        let mut properties = 0;
        loop {
            if self.peek_tag()? == tag::END_SPARSE_ARRAY {
                self.read_tag()?;
                let count = self.read_len()?;
                let length = self.read_len()?;
                if count != properties || length != len {
                    return Err(self.malformed("sparse array trailer mismatch"));
                }
                items.resize(len, Value::Null);
                return Ok(Value::Array(items));
            }
            let key = self.read_property_key(depth)?;
            let value = self.read_value(depth + 1)?;
            properties += 1;
            if let Ok(index) = key.parse::<usize>() {
                if index >= len {
                    return Err(self.malformed("sparse array index out of range"));
                }
                if index >= items.len() {
                    items.resize(index + 1, Value::Null);
                }
                items[index] = value;
            }
        }
    }
}

fn number_from_f64(value: f64) -> Result<Number, ValueError> {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_SAFE {
        return Ok(Number::from(value as i64));
    }
    Number::from_f64(value)
        .ok_or_else(|| ValueError::Unsupported(format!("non-finite number {value}")))
}
