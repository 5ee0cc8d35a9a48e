// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! In-process store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::store::validate_row;
use super::{
    KvStore, NewQueueItem, QueueItem, Row, ScanRange, StorageError, StorageResult, StoreTxn,
};

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<Vec<u8>, Row>,
    version: u64,
    queue: BTreeMap<i64, QueueItem>,
    dead_letters: BTreeMap<i64, Vec<Vec<u8>>>,
    last_queue_id: i64,
}

/// Store holding everything in memory; contents vanish on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl KvStore for MemoryStore {
    fn get_row(&self, key: &[u8]) -> StorageResult<Option<Row>> {
        self.ensure_open()?;
        Ok(self.state.lock().rows.get(key).cloned())
    }

    fn scan(&self, range: &ScanRange) -> StorageResult<Vec<Row>> {
        self.ensure_open()?;
        if range.start >= range.end || range.limit == 0 {
            return Ok(Vec::new());
        }
        let state = self.state.lock();
        let iter = state
            .rows
            .range(range.start.clone()..range.end.clone())
            .map(|(_, row)| row.clone());
        let rows = if range.reverse {
            iter.rev().take(range.limit).collect()
        } else {
            iter.take(range.limit).collect()
        };
        Ok(rows)
    }

    fn run_atomic<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTxn) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let mut txn = MemoryTxn {
            state: &mut *state,
            undo: Vec::new(),
        };
        match f(&mut txn) {
            Ok(value) => Ok(value),
            Err(err) => {
                txn.rollback();
                Err(err)
            }
        }
    }

    fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StorageError::Closed);
        }
        *self.state.lock() = MemoryState::default();
        Ok(())
    }
}

enum Undo {
    Row(Vec<u8>, Option<Row>),
    Version(u64),
    Queue(i64, Option<QueueItem>, Option<Vec<Vec<u8>>>),
    LastQueueId(i64),
}

struct MemoryTxn<'a> {
    state: &'a mut MemoryState,
    undo: Vec<Undo>,
}

impl MemoryTxn<'_> {
    fn save_row(&mut self, key: &[u8]) {
        let previous = self.state.rows.get(key).cloned();
        self.undo.push(Undo::Row(key.to_vec(), previous));
    }

    fn save_queue_item(&mut self, id: i64) {
        let item = self.state.queue.get(&id).cloned();
        let keys = self.state.dead_letters.get(&id).cloned();
        self.undo.push(Undo::Queue(id, item, keys));
    }

    fn rollback(self) {
        let state = self.state;
        for undo in self.undo.into_iter().rev() {
            match undo {
                Undo::Row(key, Some(row)) => {
                    state.rows.insert(key, row);
                }
                Undo::Row(key, None) => {
                    state.rows.remove(&key);
                }
                Undo::Version(version) => state.version = version,
                Undo::Queue(id, item, keys) => {
                    match item {
                        Some(item) => state.queue.insert(id, item),
                        None => state.queue.remove(&id),
                    };
                    match keys {
                        Some(keys) => state.dead_letters.insert(id, keys),
                        None => state.dead_letters.remove(&id),
                    };
                }
                Undo::LastQueueId(id) => state.last_queue_id = id,
            }
        }
    }
}

impl StoreTxn for MemoryTxn<'_> {
    fn get_row(&mut self, key: &[u8]) -> StorageResult<Option<Row>> {
        Ok(self.state.rows.get(key).cloned())
    }

    fn put_row(&mut self, row: Row) -> StorageResult<()> {
        validate_row(&row)?;
        self.save_row(&row.key);
        self.state.rows.insert(row.key.clone(), row);
        Ok(())
    }

    fn delete_row(&mut self, key: &[u8]) -> StorageResult<bool> {
        if !self.state.rows.contains_key(key) {
            return Ok(false);
        }
        self.save_row(key);
        self.state.rows.remove(key);
        Ok(true)
    }

    fn version(&mut self) -> StorageResult<u64> {
        Ok(self.state.version)
    }

    fn set_version(&mut self, version: u64) -> StorageResult<()> {
        self.undo.push(Undo::Version(self.state.version));
        self.state.version = version;
        Ok(())
    }

    fn delete_expired(&mut self, now: i64) -> StorageResult<usize> {
        let expired: Vec<Vec<u8>> = self
            .state
            .rows
            .iter()
            .filter(|(_, row)| row.expires_at.is_some_and(|at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.save_row(key);
            self.state.rows.remove(key);
        }
        Ok(expired.len())
    }

    fn min_expires_at(&mut self) -> StorageResult<Option<i64>> {
        Ok(self.state.rows.values().filter_map(|row| row.expires_at).min())
    }

    fn insert_queue_item(&mut self, item: NewQueueItem) -> StorageResult<i64> {
        self.undo.push(Undo::LastQueueId(self.state.last_queue_id));
        self.state.last_queue_id += 1;
        let id = self.state.last_queue_id;
        self.save_queue_item(id);
        self.state.queue.insert(
            id,
            QueueItem {
                id,
                payload: item.payload,
                encoding: item.encoding,
                failure_count: 0,
                enqueued_at: item.enqueued_at,
                available_at: item.available_at,
                locked: false,
            },
        );
        self.state.dead_letters.insert(id, item.dead_letter_keys);
        Ok(id)
    }

    fn claim_queue_item(&mut self, now: i64) -> StorageResult<Option<QueueItem>> {
        let id = self
            .state
            .queue
            .values()
            .find(|item| !item.locked && item.available_at <= now)
            .map(|item| item.id);
        let Some(id) = id else {
            return Ok(None);
        };
        self.save_queue_item(id);
        let item = self
            .state
            .queue
            .get_mut(&id)
            .ok_or(StorageError::QueueItemNotFound(id))?;
        item.locked = true;
        Ok(Some(item.clone()))
    }

    fn next_queue_available_at(&mut self) -> StorageResult<Option<i64>> {
        Ok(self
            .state
            .queue
            .values()
            .filter(|item| !item.locked)
            .map(|item| item.available_at)
            .min())
    }

    fn dead_letter_keys(&mut self, id: i64) -> StorageResult<Vec<Vec<u8>>> {
        Ok(self.state.dead_letters.get(&id).cloned().unwrap_or_default())
    }

    fn requeue_item(
        &mut self,
        id: i64,
        failure_count: u32,
        available_at: i64,
    ) -> StorageResult<()> {
        self.save_queue_item(id);
        let item = self
            .state
            .queue
            .get_mut(&id)
            .ok_or(StorageError::QueueItemNotFound(id))?;
        item.failure_count = failure_count;
        item.available_at = available_at;
        item.locked = false;
        Ok(())
    }

    fn delete_queue_item(&mut self, id: i64) -> StorageResult<()> {
        self.save_queue_item(id);
        self.state.queue.remove(&id);
        self.state.dead_letters.remove(&id);
        Ok(())
    }

    fn unlock_all_queue_items(&mut self) -> StorageResult<usize> {
        let locked: Vec<i64> = self
            .state
            .queue
            .values()
            .filter(|item| item.locked)
            .map(|item| item.id)
            .collect();
        for id in &locked {
            self.save_queue_item(*id);
            if let Some(item) = self.state.queue.get_mut(id) {
                item.locked = false;
            }
        }
        Ok(locked.len())
    }
}
