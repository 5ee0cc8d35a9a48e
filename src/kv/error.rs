// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Engine error types.

use crate::key::KeyError;
use crate::remote::RemoteError;
use crate::storage::StorageError;
use crate::value::ValueError;

/// Errors returned by [`Kv`](super::Kv) and its builders.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("key must not be empty")]
    EmptyKey,

    #[error("expire_in must be a positive number of milliseconds no larger than 2^53-1")]
    InvalidExpireIn,

    #[error("invalid list selector: {0}")]
    InvalidSelector(String),

    #[error("invalid list options: {0}")]
    InvalidListOptions(String),

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("cannot read cursor before the first entry has been yielded")]
    CursorUnavailable,

    #[error("invalid versionstamp: {0:?}")]
    InvalidVersionstamp(String),

    #[error("commit counter {0} exceeds the versionstamp range")]
    VersionExhausted(u64),

    #[error("failed to perform '{op}' mutation on a non-U64 value in the database")]
    NotU64 { op: &'static str },

    #[error("commit checks failed")]
    CheckFailed,

    #[error("cannot call '{method}' after 'close' is called")]
    Closed { method: &'static str },

    #[error("queue handler already registered")]
    HandlerAlreadyRegistered,

    #[error("listen_queue is not supported by this backend")]
    QueueUnsupported,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("value error: {0}")]
    Value(#[from] ValueError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

/// Result alias for engine operations.
pub type KvResult<T> = Result<T, KvError>;

impl From<tokio::task::JoinError> for KvError {
    fn from(err: tokio::task::JoinError) -> Self {
        KvError::Task(err.to_string())
    }
}
