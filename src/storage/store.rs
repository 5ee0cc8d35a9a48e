// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Store types and trait definitions.

use std::collections::HashMap;

use crate::kv::Versionstamp;
use crate::value::ValueEncoding;

use super::error::{StorageError, StorageResult};

/// Maximum packed key size in bytes.
pub const MAX_KEY_SIZE: usize = 8 * 1024; // 8KB

/// Maximum encoded value size in bytes.
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024; // 64MB

/// A stored key-value row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub encoding: ValueEncoding,
    pub versionstamp: Versionstamp,
    /// Expiry instant in milliseconds since the Unix epoch.
    pub expires_at: Option<i64>,
}

/// A persisted queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: i64,
    pub payload: Vec<u8>,
    pub encoding: ValueEncoding,
    pub failure_count: u32,
    pub enqueued_at: i64,
    pub available_at: i64,
    pub locked: bool,
}

/// A queue message about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueItem {
    pub payload: Vec<u8>,
    pub encoding: ValueEncoding,
    pub enqueued_at: i64,
    pub available_at: i64,
    /// Packed keys that receive the payload if delivery is abandoned.
    pub dead_letter_keys: Vec<Vec<u8>>,
}

/// Half-open key range `[start, end)` for scans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub limit: usize,
    pub reverse: bool,
}

impl ScanRange {
    #[inline]
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && key < self.end.as_slice()
    }
}

/// Ordered byte-keyed storage driven by the engine.
///
/// Shared reads may run concurrently with each other and with
/// [`run_atomic`](KvStore::run_atomic); every write goes through
/// `run_atomic`, which is the single serialization point.
pub trait KvStore: Send + Sync + 'static {
    /// Reads one row.
    fn get_row(&self, key: &[u8]) -> StorageResult<Option<Row>>;

    /// Reads several rows; absent keys are missing from the map.
    fn get_rows(&self, keys: &[Vec<u8>]) -> StorageResult<HashMap<Vec<u8>, Row>> {
        let mut rows = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(row) = self.get_row(key)? {
                rows.insert(key.clone(), row);
            }
        }
        Ok(rows)
    }

    /// Returns up to `range.limit` rows in key order (descending if reversed).
    fn scan(&self, range: &ScanRange) -> StorageResult<Vec<Row>>;

    /// Runs `f` with exclusive, all-or-nothing access.
    ///
    /// Changes made through the transaction become visible only if `f`
    /// returns `Ok`; an `Err` rolls every change back.
    fn run_atomic<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTxn) -> Result<T, E>,
        E: From<StorageError>;

    /// Releases resources. A second call fails with [`StorageError::Closed`].
    fn close(&self) -> StorageResult<()>;
}

/// Operations available inside [`KvStore::run_atomic`].
pub trait StoreTxn {
    fn get_row(&mut self, key: &[u8]) -> StorageResult<Option<Row>>;

    /// Inserts or replaces a row.
    fn put_row(&mut self, row: Row) -> StorageResult<()>;

    /// Removes a row, returning whether it existed.
    fn delete_row(&mut self, key: &[u8]) -> StorageResult<bool>;

    /// Last committed version counter.
    fn version(&mut self) -> StorageResult<u64>;

    fn set_version(&mut self, version: u64) -> StorageResult<()>;

    /// Deletes every row with `expires_at <= now`, returning the count.
    fn delete_expired(&mut self, now: i64) -> StorageResult<usize>;

    /// Earliest expiry among live rows.
    fn min_expires_at(&mut self) -> StorageResult<Option<i64>>;

    /// Persists a queue item with its dead-letter keys, returning its id.
    fn insert_queue_item(&mut self, item: NewQueueItem) -> StorageResult<i64>;

    /// Locks and returns the lowest-id unlocked item available at `now`.
    fn claim_queue_item(&mut self, now: i64) -> StorageResult<Option<QueueItem>>;

    /// Earliest `available_at` among unlocked items.
    fn next_queue_available_at(&mut self) -> StorageResult<Option<i64>>;

    fn dead_letter_keys(&mut self, id: i64) -> StorageResult<Vec<Vec<u8>>>;

    /// Records a failed delivery and unlocks the item.
    fn requeue_item(&mut self, id: i64, failure_count: u32, available_at: i64)
        -> StorageResult<()>;

    /// Deletes an item together with its dead-letter keys.
    fn delete_queue_item(&mut self, id: i64) -> StorageResult<()>;

    /// Unlocks items left locked by a process that stopped mid-delivery.
    fn unlock_all_queue_items(&mut self) -> StorageResult<usize>;
}

/// Validates sizes before a row reaches a store.
pub fn validate_row(row: &Row) -> StorageResult<()> {
    if row.key.len() > MAX_KEY_SIZE {
        return Err(StorageError::KeyTooLarge {
            size: row.key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    if row.value.len() > MAX_VALUE_SIZE {
        return Err(StorageError::ValueTooLarge {
            size: row.value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}
