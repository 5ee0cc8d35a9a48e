// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Value encoding error types.

/// Errors raised while encoding or decoding stored values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("value {0} is outside the u64 range")]
    U64OutOfRange(String),

    #[error("unknown value encoding {0}")]
    UnknownEncoding(String),

    #[error("u64 value must be 8 bytes, got {0}")]
    InvalidLe64Length(usize),

    #[error("serialized value is malformed: {0}")]
    Malformed(String),

    #[error("value cannot be serialized: {0}")]
    Unsupported(String),
}
