// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Storage error types.

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("store is closed")]
    Closed,

    #[error("key too large: {size} > {max}")]
    KeyTooLarge { size: usize, max: usize },

    #[error("value too large: {size} > {max}")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage corruption: {0}")]
    Corruption(String),

    #[error("unsupported schema version {found}, expected at most {supported}")]
    SchemaVersion { found: i64, supported: i64 },

    #[error("queue item {0} not found")]
    QueueItemNotFound(i64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
