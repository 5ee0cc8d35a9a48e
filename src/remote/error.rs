// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Remote backend error types.

use crate::value::ValueEncoding;

/// Errors from talking to a remote database.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response status: {status} {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("unexpected response content-type: {content_type:?}")]
    UnexpectedContentType { content_type: Option<String> },

    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("bad database metadata: {0}")]
    BadMetadata(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    #[error("no endpoint for {0} consistency")]
    NoEndpoint(&'static str),

    #[error("snapshot read checks failed after retry: read_disabled={read_disabled} read_is_strongly_consistent={strongly_consistent}")]
    ReadChecksFailed {
        read_disabled: bool,
        strongly_consistent: bool,
    },

    #[error("atomic write failed with status {status}{}", primary_hint(.primary_if_write_disabled))]
    WriteFailed {
        status: i32,
        primary_if_write_disabled: String,
    },

    #[error("remote versionstamp must be 10 bytes, got {0}")]
    InvalidVersionstamp(usize),

    #[error("remote values must use the structured encoding, got {0}")]
    UnsupportedPayload(ValueEncoding),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn primary_hint(primary: &str) -> String {
    if primary.is_empty() {
        String::new()
    } else {
        format!(" (primary_if_write_disabled={primary})")
    }
}

/// Result alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;
