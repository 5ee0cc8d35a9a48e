// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Key codec error types.

/// Errors raised while packing or unpacking tuple keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("unsupported typecode 0x{typecode:02x} at offset {offset}")]
    UnsupportedTypecode { typecode: u8, offset: usize },

    #[error("unexpected end of key at offset {offset}")]
    UnexpectedEnd { offset: usize },

    #[error("unexpected trailing bytes: {remaining} left after decoding")]
    TrailingBytes { remaining: usize },

    #[error("string key part is not valid utf-8")]
    InvalidUtf8,

    #[error("integer magnitude of {bytes} bytes cannot be encoded")]
    IntegerTooLarge { bytes: usize },
}
