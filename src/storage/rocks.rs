// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! RocksDB-backed store.
//!
//! Everything lives in one keyspace, partitioned by a one-byte prefix:
//!
//! | Prefix | Key | Value |
//! |---|---|---|
//! | `k` | packed user key | row |
//! | `e` | expiry (sortable i64 BE) + packed user key | empty |
//! | `q` | queue id (u64 BE) | queue item |
//! | `r` | available at (sortable i64 BE) + queue id | empty, unlocked items only |
//! | `l` | queue id (u64 BE) | empty, locked items only |
//! | `d` | queue id (u64 BE) + packed user key | empty |
//! | `p` | property name | property value |
//!
//! Transactions buffer their writes in an ordered overlay that serves their
//! own reads, then apply it as a single `WriteBatch` while holding the store's
//! write lock. Prefix reads merge the overlay into the RocksDB iterator
//! lazily, so queue dispatch and expiry sweeps stop at the first entry past
//! their bound.

use std::cmp::Ordering;
use std::collections::{btree_map, BTreeMap};
use std::iter::Peekable;
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use rocksdb::{
    DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch, WriteOptions,
};
use tracing::{debug, info};

use crate::kv::{Versionstamp, VERSIONSTAMP_LEN};
use crate::value::ValueEncoding;

use super::store::validate_row;
use super::{
    KvStore, NewQueueItem, QueueItem, Row, ScanRange, StorageError, StorageResult, StoreTxn,
};

type Db = DBWithThreadMode<MultiThreaded>;

const ROW: u8 = b'k';
const EXPIRY: u8 = b'e';
const QUEUE: u8 = b'q';
const READY: u8 = b'r';
const LOCKED: u8 = b'l';
const DEAD_LETTER: u8 = b'd';
const PROP: u8 = b'p';

const PROP_VERSION: &[u8] = b"version";
const PROP_QUEUE_ID: &[u8] = b"queue_id";

/// Durability mode for commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Commits reach the WAL but are not fsynced.
    /// Durable against process crashes but not power failures.
    #[default]
    WalOnly,
    /// Every commit is fsynced.
    FsyncEveryWrite,
}

fn prefixed(prefix: u8, body: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + body.len());
    key.push(prefix);
    key.extend_from_slice(body);
    key
}

#[inline]
fn sortable_i64(value: i64) -> [u8; 8] {
    ((value as u64) ^ (1 << 63)).to_be_bytes()
}

#[inline]
fn unsortable_i64(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64
}

fn expiry_key(expires_at: i64, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + key.len());
    out.push(EXPIRY);
    out.extend_from_slice(&sortable_i64(expires_at));
    out.extend_from_slice(key);
    out
}

fn queue_key(id: i64) -> Vec<u8> {
    prefixed(QUEUE, &(id as u64).to_be_bytes())
}

fn ready_key(available_at: i64, id: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(17);
    out.push(READY);
    out.extend_from_slice(&sortable_i64(available_at));
    out.extend_from_slice(&(id as u64).to_be_bytes());
    out
}

fn locked_key(id: i64) -> Vec<u8> {
    prefixed(LOCKED, &(id as u64).to_be_bytes())
}

fn dead_letter_prefix(id: i64) -> Vec<u8> {
    prefixed(DEAD_LETTER, &(id as u64).to_be_bytes())
}

fn corruption(what: &str) -> StorageError {
    StorageError::Corruption(what.to_string())
}

fn read_array<const N: usize>(bytes: &[u8], at: usize) -> StorageResult<[u8; N]> {
    bytes
        .get(at..at + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| corruption("truncated record"))
}

fn encoding_byte(byte: u8) -> StorageResult<ValueEncoding> {
    ValueEncoding::from_i32(i32::from(byte)).map_err(|e| StorageError::Corruption(e.to_string()))
}

// [encoding][versionstamp; 20][has_expiry][expires_at; 8]?[value...]
fn encode_row(row: &Row) -> Vec<u8> {
    let mut out = Vec::with_capacity(30 + row.value.len());
    out.push(row.encoding.as_i32() as u8);
    out.extend_from_slice(row.versionstamp.as_str().as_bytes());
    match row.expires_at {
        Some(at) => {
            out.push(1);
            out.extend_from_slice(&at.to_be_bytes());
        }
        None => out.push(0),
    }
    out.extend_from_slice(&row.value);
    out
}

fn decode_row(key: &[u8], bytes: &[u8]) -> StorageResult<Row> {
    let encoding = encoding_byte(*bytes.first().ok_or_else(|| corruption("empty row"))?)?;
    let stamp: [u8; VERSIONSTAMP_LEN] = read_array(bytes, 1)?;
    let stamp = std::str::from_utf8(&stamp).map_err(|_| corruption("versionstamp"))?;
    let versionstamp =
        Versionstamp::parse(stamp).map_err(|e| StorageError::Corruption(e.to_string()))?;
    let flag_at = 1 + VERSIONSTAMP_LEN;
    let (expires_at, value_at) = match bytes.get(flag_at) {
        Some(0) => (None, flag_at + 1),
        Some(1) => (
            Some(i64::from_be_bytes(read_array(bytes, flag_at + 1)?)),
            flag_at + 9,
        ),
        _ => return Err(corruption("row expiry flag")),
    };
    Ok(Row {
        key: key.to_vec(),
        value: bytes[value_at..].to_vec(),
        encoding,
        versionstamp,
        expires_at,
    })
}

// [encoding][failures; 4][enqueued; 8][available; 8][locked][payload...]
fn encode_queue_item(item: &QueueItem) -> Vec<u8> {
    let mut out = Vec::with_capacity(22 + item.payload.len());
    out.push(item.encoding.as_i32() as u8);
    out.extend_from_slice(&item.failure_count.to_be_bytes());
    out.extend_from_slice(&item.enqueued_at.to_be_bytes());
    out.extend_from_slice(&item.available_at.to_be_bytes());
    out.push(u8::from(item.locked));
    out.extend_from_slice(&item.payload);
    out
}

fn decode_queue_item(id: i64, bytes: &[u8]) -> StorageResult<QueueItem> {
    let encoding = encoding_byte(*bytes.first().ok_or_else(|| corruption("empty queue item"))?)?;
    let locked = *bytes.get(21).ok_or_else(|| corruption("queue lock flag"))? != 0;
    Ok(QueueItem {
        id,
        payload: bytes[22..].to_vec(),
        encoding,
        failure_count: u32::from_be_bytes(read_array(bytes, 1)?),
        enqueued_at: i64::from_be_bytes(read_array(bytes, 5)?),
        available_at: i64::from_be_bytes(read_array(bytes, 13)?),
        locked,
    })
}

fn read_id(key: &[u8], at: usize) -> StorageResult<i64> {
    Ok(u64::from_be_bytes(read_array(key, at)?) as i64)
}

/// Store backed by RocksDB.
pub struct RocksStore {
    db: RwLock<Option<Db>>,
    write_lock: Mutex<()>,
    write_opts: WriteOptions,
}

impl RocksStore {
    /// Opens or creates a database at the given path.
    ///
    /// Uses `DurabilityMode::WalOnly`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with_durability(path, DurabilityMode::default())
    }

    /// Opens or creates a database with the given durability mode.
    pub fn open_with_durability(
        path: impl AsRef<Path>,
        durability: DurabilityMode,
    ) -> StorageResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024); // 64MB
        opts.set_max_write_buffer_number(4);
        opts.set_level_compaction_dynamic_level_bytes(true);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        Self::open_with_options(path, opts, durability)
    }

    /// Opens a database with custom RocksDB options.
    pub fn open_with_options(
        path: impl AsRef<Path>,
        opts: Options,
        durability: DurabilityMode,
    ) -> StorageResult<Self> {
        let path = path.as_ref();
        let db = Db::open(&opts, path)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(durability == DurabilityMode::FsyncEveryWrite);

        info!(path = %path.display(), ?durability, "opened rocksdb store");
        Ok(Self {
            db: RwLock::new(Some(db)),
            write_lock: Mutex::new(()),
            write_opts,
        })
    }

    /// Flushes memtables to disk.
    pub fn sync(&self) -> StorageResult<()> {
        self.with_db(|db| Ok(db.flush()?))
    }

    fn with_db<T>(&self, f: impl FnOnce(&Db) -> StorageResult<T>) -> StorageResult<T> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        f(db)
    }
}

impl KvStore for RocksStore {
    fn get_row(&self, key: &[u8]) -> StorageResult<Option<Row>> {
        self.with_db(|db| {
            db.get(prefixed(ROW, key))?
                .map(|bytes| decode_row(key, &bytes))
                .transpose()
        })
    }

    fn scan(&self, range: &ScanRange) -> StorageResult<Vec<Row>> {
        self.with_db(|db| {
            let mut rows = Vec::new();
            if range.start >= range.end || range.limit == 0 {
                return Ok(rows);
            }
            let start = prefixed(ROW, &range.start);
            let end = prefixed(ROW, &range.end);

            let iter = if range.reverse {
                db.iterator(IteratorMode::From(end.as_slice(), Direction::Reverse))
            } else {
                db.iterator(IteratorMode::From(start.as_slice(), Direction::Forward))
            };
            for item in iter {
                let (key, value) = item?;
                let key: &[u8] = &key;
                if range.reverse {
                    if key >= end.as_slice() {
                        continue;
                    }
                    if key < start.as_slice() {
                        break;
                    }
                } else if key >= end.as_slice() {
                    break;
                }
                rows.push(decode_row(&key[1..], &value)?);
                if rows.len() >= range.limit {
                    break;
                }
            }
            Ok(rows)
        })
    }

    fn run_atomic<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTxn) -> Result<T, E>,
        E: From<StorageError>,
    {
        let _writer = self.write_lock.lock();
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        let mut txn = RocksTxn {
            db,
            pending: BTreeMap::new(),
        };
        let value = f(&mut txn)?;
        txn.commit(&self.write_opts)?;
        Ok(value)
    }

    fn close(&self) -> StorageResult<()> {
        let _writer = self.write_lock.lock();
        let db = self.db.write().take().ok_or(StorageError::Closed)?;
        db.flush()?;
        drop(db);
        debug!("closed rocksdb store");
        Ok(())
    }
}

struct RocksTxn<'a> {
    db: &'a Db,
    /// `None` marks a pending delete.
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl RocksTxn<'_> {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        if let Some(pending) = self.pending.get(key) {
            return Ok(pending.clone());
        }
        Ok(self.db.get(key)?)
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending.insert(key, None);
    }

    /// Live entries under `prefix` in key order, pending writes included.
    fn entries(&self, prefix: &[u8]) -> PrefixEntries<'_> {
        let owned = prefix.to_vec();
        let committed = self
            .db
            .prefix_iterator(prefix)
            .map(|item| {
                item.map(|(key, value)| (key.into_vec(), value.into_vec()))
                    .map_err(StorageError::from)
            })
            .take_while(move |item| item.as_ref().map_or(true, |(key, _)| key.starts_with(&owned)));
        PrefixEntries {
            committed: (Box::new(committed) as CommittedIter<'_>).peekable(),
            pending: self.pending.range(prefix.to_vec()..).peekable(),
            prefix: prefix.to_vec(),
        }
    }

    fn read_u64_prop(&self, name: &[u8]) -> StorageResult<u64> {
        match self.get(&prefixed(PROP, name))? {
            None => Ok(0),
            Some(bytes) => Ok(u64::from_be_bytes(read_array(&bytes, 0)?)),
        }
    }

    fn find_queue_item(&self, id: i64) -> StorageResult<Option<QueueItem>> {
        self.get(&queue_key(id))?
            .map(|bytes| decode_queue_item(id, &bytes))
            .transpose()
    }

    fn load_queue_item(&self, id: i64) -> StorageResult<QueueItem> {
        self.find_queue_item(id)?
            .ok_or(StorageError::QueueItemNotFound(id))
    }

    /// Drops whichever index entry currently points at `item`.
    fn unindex_queue_item(&mut self, item: &QueueItem) {
        if item.locked {
            self.delete(locked_key(item.id));
        } else {
            self.delete(ready_key(item.available_at, item.id));
        }
    }

    fn save_queue_item(&mut self, item: &QueueItem) {
        if item.locked {
            self.put(locked_key(item.id), Vec::new());
        } else {
            self.put(ready_key(item.available_at, item.id), Vec::new());
        }
        self.put(queue_key(item.id), encode_queue_item(item));
    }

    fn commit(self, write_opts: &WriteOptions) -> StorageResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        for (key, value) in self.pending {
            match value {
                Some(value) => batch.put(&key, &value),
                None => batch.delete(&key),
            }
        }
        self.db.write_opt(batch, write_opts)?;
        Ok(())
    }
}

type CommittedIter<'a> = Box<dyn Iterator<Item = StorageResult<(Vec<u8>, Vec<u8>)>> + 'a>;

/// Ordered merge of committed entries and a transaction's pending writes
/// under one key prefix.
struct PrefixEntries<'a> {
    committed: Peekable<CommittedIter<'a>>,
    pending: Peekable<btree_map::Range<'a, Vec<u8>, Option<Vec<u8>>>>,
    prefix: Vec<u8>,
}

impl Iterator for PrefixEntries<'_> {
    type Item = StorageResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(Err(_)) = self.committed.peek() {
                return self.committed.next();
            }
            let committed = self
                .committed
                .peek()
                .and_then(|item| item.as_ref().ok())
                .map(|(key, _)| key.as_slice());
            let prefix = self.prefix.as_slice();
            let pending = self
                .pending
                .peek()
                .map(|(key, _)| key.as_slice())
                .filter(|key| key.starts_with(prefix));
            let order = match (committed, pending) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(committed), Some(pending)) => committed.cmp(pending),
            };
            if order == Ordering::Less {
                return self.committed.next();
            }
            if order == Ordering::Equal {
                self.committed.next();
            }
            match self.pending.next() {
                Some((key, Some(value))) => return Some(Ok((key.clone(), value.clone()))),
                Some((_, None)) => continue,
                None => return None,
            }
        }
    }
}

impl StoreTxn for RocksTxn<'_> {
    fn get_row(&mut self, key: &[u8]) -> StorageResult<Option<Row>> {
        self.get(&prefixed(ROW, key))?
            .map(|bytes| decode_row(key, &bytes))
            .transpose()
    }

    fn put_row(&mut self, row: Row) -> StorageResult<()> {
        validate_row(&row)?;
        if let Some(old) = self.get_row(&row.key)? {
            if let Some(at) = old.expires_at {
                self.delete(expiry_key(at, &old.key));
            }
        }
        if let Some(at) = row.expires_at {
            self.put(expiry_key(at, &row.key), Vec::new());
        }
        self.put(prefixed(ROW, &row.key), encode_row(&row));
        Ok(())
    }

    fn delete_row(&mut self, key: &[u8]) -> StorageResult<bool> {
        let Some(old) = self.get_row(key)? else {
            return Ok(false);
        };
        if let Some(at) = old.expires_at {
            self.delete(expiry_key(at, key));
        }
        self.delete(prefixed(ROW, key));
        Ok(true)
    }

    fn version(&mut self) -> StorageResult<u64> {
        self.read_u64_prop(PROP_VERSION)
    }

    fn set_version(&mut self, version: u64) -> StorageResult<()> {
        self.put(prefixed(PROP, PROP_VERSION), version.to_be_bytes().to_vec());
        Ok(())
    }

    fn delete_expired(&mut self, now: i64) -> StorageResult<usize> {
        let mut expired = Vec::new();
        for entry in self.entries(&[EXPIRY]) {
            let (index_key, _) = entry?;
            if unsortable_i64(read_array(&index_key, 1)?) > now {
                break;
            }
            expired.push(index_key);
        }
        let deleted = expired.len();
        for index_key in expired {
            self.delete(prefixed(ROW, &index_key[9..]));
            self.delete(index_key);
        }
        Ok(deleted)
    }

    fn min_expires_at(&mut self) -> StorageResult<Option<i64>> {
        let first = self.entries(&[EXPIRY]).next().transpose()?;
        first
            .map(|(index_key, _)| Ok(unsortable_i64(read_array(&index_key, 1)?)))
            .transpose()
    }

    fn insert_queue_item(&mut self, item: NewQueueItem) -> StorageResult<i64> {
        let id = self.read_u64_prop(PROP_QUEUE_ID)? + 1;
        self.put(prefixed(PROP, PROP_QUEUE_ID), id.to_be_bytes().to_vec());
        let id = id as i64;

        let record = QueueItem {
            id,
            payload: item.payload,
            encoding: item.encoding,
            failure_count: 0,
            enqueued_at: item.enqueued_at,
            available_at: item.available_at,
            locked: false,
        };
        self.save_queue_item(&record);
        let prefix = dead_letter_prefix(id);
        for key in item.dead_letter_keys {
            let mut entry = prefix.clone();
            entry.extend_from_slice(&key);
            self.put(entry, Vec::new());
        }
        Ok(id)
    }

    fn claim_queue_item(&mut self, now: i64) -> StorageResult<Option<QueueItem>> {
        // Lowest id among the ready entries at or before `now`.
        let mut lowest: Option<i64> = None;
        for entry in self.entries(&[READY]) {
            let (index_key, _) = entry?;
            if unsortable_i64(read_array(&index_key, 1)?) > now {
                break;
            }
            let id = read_id(&index_key, 9)?;
            lowest = Some(lowest.map_or(id, |current| current.min(id)));
        }
        let Some(id) = lowest else {
            return Ok(None);
        };
        let mut item = self.load_queue_item(id)?;
        self.unindex_queue_item(&item);
        item.locked = true;
        self.save_queue_item(&item);
        Ok(Some(item))
    }

    fn next_queue_available_at(&mut self) -> StorageResult<Option<i64>> {
        let first = self.entries(&[READY]).next().transpose()?;
        first
            .map(|(index_key, _)| Ok(unsortable_i64(read_array(&index_key, 1)?)))
            .transpose()
    }

    fn dead_letter_keys(&mut self, id: i64) -> StorageResult<Vec<Vec<u8>>> {
        let prefix = dead_letter_prefix(id);
        self.entries(&prefix)
            .map(|entry| entry.map(|(key, _)| key[prefix.len()..].to_vec()))
            .collect()
    }

    fn requeue_item(
        &mut self,
        id: i64,
        failure_count: u32,
        available_at: i64,
    ) -> StorageResult<()> {
        let mut item = self.load_queue_item(id)?;
        self.unindex_queue_item(&item);
        item.failure_count = failure_count;
        item.available_at = available_at;
        item.locked = false;
        self.save_queue_item(&item);
        Ok(())
    }

    fn delete_queue_item(&mut self, id: i64) -> StorageResult<()> {
        let dead_letters = self
            .entries(&dead_letter_prefix(id))
            .map(|entry| entry.map(|(key, _)| key))
            .collect::<StorageResult<Vec<_>>>()?;
        for key in dead_letters {
            self.delete(key);
        }
        if let Some(item) = self.find_queue_item(id)? {
            self.unindex_queue_item(&item);
        }
        self.delete(queue_key(id));
        Ok(())
    }

    fn unlock_all_queue_items(&mut self) -> StorageResult<usize> {
        let locked = self
            .entries(&[LOCKED])
            .map(|entry| entry.and_then(|(key, _)| read_id(&key, 1)))
            .collect::<StorageResult<Vec<_>>>()?;
        for &id in &locked {
            let mut item = self.load_queue_item(id)?;
            self.unindex_queue_item(&item);
            item.locked = false;
            self.save_queue_item(&item);
        }
        Ok(locked.len())
    }
}
