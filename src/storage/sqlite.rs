// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! SQLite-backed store.
//!
//! Schema:
//!
//! ```text
//! prop(name text primary key, value text)
//! kv(key blob primary key, bytes blob, encoding text, versionstamp text, expires integer)
//! queue(id integer primary key autoincrement, bytes blob, encoding text,
//!       failures integer, enqueued integer, available integer, locked integer)
//! queue_keys_if_undelivered(id integer, key blob, primary key (id, key))
//! ```

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use crate::kv::Versionstamp;
use crate::value::ValueEncoding;

use super::store::validate_row;
use super::{
    KvStore, NewQueueItem, QueueItem, Row, ScanRange, StorageError, StorageResult, StoreTxn,
};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
    create table if not exists prop (
        name text primary key,
        value text not null
    );
    create table if not exists kv (
        key blob primary key,
        bytes blob not null,
        encoding text not null,
        versionstamp text not null,
        expires integer
    ) without rowid;
    create index if not exists kv_expires on kv (expires) where expires is not null;
    create table if not exists queue (
        id integer primary key autoincrement,
        bytes blob not null,
        encoding text not null,
        failures integer not null default 0,
        enqueued integer not null,
        available integer not null,
        locked integer not null default 0
    );
    create index if not exists queue_available on queue (available) where locked = 0;
    create table if not exists queue_keys_if_undelivered (
        id integer not null,
        key blob not null,
        primary key (id, key)
    ) without rowid;
";

const ROW_COLUMNS: &str = "key, bytes, encoding, versionstamp, expires";

type RawRow = (Vec<u8>, Vec<u8>, String, String, Option<i64>);

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_row((key, value, encoding, versionstamp, expires_at): RawRow) -> StorageResult<Row> {
    let encoding = encoding
        .parse::<ValueEncoding>()
        .map_err(|e| StorageError::Corruption(e.to_string()))?;
    let versionstamp = Versionstamp::parse(&versionstamp)
        .map_err(|e| StorageError::Corruption(e.to_string()))?;
    Ok(Row {
        key,
        value,
        encoding,
        versionstamp,
        expires_at,
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Store backed by an embedded SQLite database.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Opens or creates a database file.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        info!(path = %path.display(), "opened sqlite store");
        Self::init(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StorageResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        let schema: Option<String> = conn
            .query_row("select value from prop where name = 'schema'", [], |row| {
                row.get(0)
            })
            .optional()?;
        match schema {
            None => {
                conn.execute(
                    "insert into prop (name, value) values ('schema', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(found) => {
                let found: i64 = found
                    .parse()
                    .map_err(|_| StorageError::Corruption(format!("schema version {found:?}")))?;
                if found > SCHEMA_VERSION {
                    return Err(StorageError::SchemaVersion {
                        found,
                        supported: SCHEMA_VERSION,
                    });
                }
            }
        }

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        f(conn)
    }
}

impl KvStore for SqliteStore {
    fn get_row(&self, key: &[u8]) -> StorageResult<Option<Row>> {
        self.with_conn(|conn| get_row(conn, key))
    }

    fn get_rows(
        &self,
        keys: &[Vec<u8>],
    ) -> StorageResult<std::collections::HashMap<Vec<u8>, Row>> {
        self.with_conn(|conn| {
            let mut rows = std::collections::HashMap::with_capacity(keys.len());
            for key in keys {
                if let Some(row) = get_row(conn, key)? {
                    rows.insert(key.clone(), row);
                }
            }
            Ok(rows)
        })
    }

    fn scan(&self, range: &ScanRange) -> StorageResult<Vec<Row>> {
        if range.start >= range.end || range.limit == 0 {
            return self.with_conn(|_| Ok(Vec::new()));
        }
        self.with_conn(|conn| {
            let sql = if range.reverse {
                format!(
                    "select {ROW_COLUMNS} from kv where key >= ?1 and key < ?2 order by key desc limit ?3"
                )
            } else {
                format!(
                    "select {ROW_COLUMNS} from kv where key >= ?1 and key < ?2 order by key asc limit ?3"
                )
            };
            let mut stmt = conn.prepare_cached(&sql)?;
            let raw = stmt
                .query_map(
                    params![range.start, range.end, sql_limit(range.limit)],
                    raw_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter().map(into_row).collect()
        })
    }

    fn run_atomic<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTxn) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(StorageError::Closed)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;
        let mut txn = SqliteTxn { conn: &tx };
        let value = f(&mut txn)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(value)
    }

    fn close(&self) -> StorageResult<()> {
        let conn = self.conn.lock().take().ok_or(StorageError::Closed)?;
        conn.close().map_err(|(_, err)| StorageError::from(err))?;
        debug!("closed sqlite store");
        Ok(())
    }
}

fn get_row(conn: &Connection, key: &[u8]) -> StorageResult<Option<Row>> {
    let mut stmt = conn.prepare_cached(&format!("select {ROW_COLUMNS} from kv where key = ?1"))?;
    let raw = stmt.query_row(params![key], raw_row).optional()?;
    raw.map(into_row).transpose()
}

struct SqliteTxn<'a> {
    conn: &'a Connection,
}

impl SqliteTxn<'_> {
    fn read_prop(&self, name: &str) -> StorageResult<Option<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("select value from prop where name = ?1")?;
        Ok(stmt.query_row(params![name], |row| row.get(0)).optional()?)
    }
}

impl StoreTxn for SqliteTxn<'_> {
    fn get_row(&mut self, key: &[u8]) -> StorageResult<Option<Row>> {
        get_row(self.conn, key)
    }

    fn put_row(&mut self, row: Row) -> StorageResult<()> {
        validate_row(&row)?;
        let mut stmt = self.conn.prepare_cached(&format!(
            "insert or replace into kv ({ROW_COLUMNS}) values (?1, ?2, ?3, ?4, ?5)"
        ))?;
        stmt.execute(params![
            row.key,
            row.value,
            row.encoding.as_str(),
            row.versionstamp.as_str(),
            row.expires_at
        ])?;
        Ok(())
    }

    fn delete_row(&mut self, key: &[u8]) -> StorageResult<bool> {
        let mut stmt = self.conn.prepare_cached("delete from kv where key = ?1")?;
        Ok(stmt.execute(params![key])? > 0)
    }

    fn version(&mut self) -> StorageResult<u64> {
        match self.read_prop("version")? {
            None => Ok(0),
            Some(v) => v
                .parse()
                .map_err(|_| StorageError::Corruption(format!("version {v:?}"))),
        }
    }

    fn set_version(&mut self, version: u64) -> StorageResult<()> {
        let mut stmt = self
            .conn
            .prepare_cached("insert or replace into prop (name, value) values ('version', ?1)")?;
        stmt.execute(params![version.to_string()])?;
        Ok(())
    }

    fn delete_expired(&mut self, now: i64) -> StorageResult<usize> {
        let mut stmt = self.conn.prepare_cached("delete from kv where expires <= ?1")?;
        Ok(stmt.execute(params![now])?)
    }

    fn min_expires_at(&mut self) -> StorageResult<Option<i64>> {
        let mut stmt = self.conn.prepare_cached("select min(expires) from kv")?;
        Ok(stmt.query_row([], |row| row.get(0))?)
    }

    fn insert_queue_item(&mut self, item: NewQueueItem) -> StorageResult<i64> {
        let mut stmt = self.conn.prepare_cached(
            "insert into queue (bytes, encoding, failures, enqueued, available, locked)
             values (?1, ?2, 0, ?3, ?4, 0)",
        )?;
        stmt.execute(params![
            item.payload,
            item.encoding.as_str(),
            item.enqueued_at,
            item.available_at
        ])?;
        let id = self.conn.last_insert_rowid();

        let mut keys = self.conn.prepare_cached(
            "insert or ignore into queue_keys_if_undelivered (id, key) values (?1, ?2)",
        )?;
        for key in &item.dead_letter_keys {
            keys.execute(params![id, key])?;
        }
        Ok(id)
    }

    fn claim_queue_item(&mut self, now: i64) -> StorageResult<Option<QueueItem>> {
        let mut stmt = self.conn.prepare_cached(
            "update queue set locked = 1
             where id = (select min(id) from queue where available <= ?1 and locked = 0)
             returning id, bytes, encoding, failures, enqueued, available",
        )?;
        let raw = stmt
            .query_row(params![now], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .optional()?;

        raw.map(|(id, payload, encoding, failure_count, enqueued_at, available_at)| {
            let encoding = encoding
                .parse::<ValueEncoding>()
                .map_err(|e| StorageError::Corruption(e.to_string()))?;
            Ok(QueueItem {
                id,
                payload,
                encoding,
                failure_count,
                enqueued_at,
                available_at,
                locked: true,
            })
        })
        .transpose()
    }

    fn next_queue_available_at(&mut self) -> StorageResult<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare_cached("select min(available) from queue where locked = 0")?;
        Ok(stmt.query_row([], |row| row.get(0))?)
    }

    fn dead_letter_keys(&mut self, id: i64) -> StorageResult<Vec<Vec<u8>>> {
        let mut stmt = self
            .conn
            .prepare_cached("select key from queue_keys_if_undelivered where id = ?1 order by key")?;
        let keys = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
        Ok(keys)
    }

    fn requeue_item(
        &mut self,
        id: i64,
        failure_count: u32,
        available_at: i64,
    ) -> StorageResult<()> {
        let mut stmt = self.conn.prepare_cached(
            "update queue set failures = ?2, available = ?3, locked = 0 where id = ?1",
        )?;
        if stmt.execute(params![id, failure_count, available_at])? == 0 {
            return Err(StorageError::QueueItemNotFound(id));
        }
        Ok(())
    }

    fn delete_queue_item(&mut self, id: i64) -> StorageResult<()> {
        self.conn
            .prepare_cached("delete from queue where id = ?1")?
            .execute(params![id])?;
        self.conn
            .prepare_cached("delete from queue_keys_if_undelivered where id = ?1")?
            .execute(params![id])?;
        Ok(())
    }

    fn unlock_all_queue_items(&mut self) -> StorageResult<usize> {
        let mut stmt = self
            .conn
            .prepare_cached("update queue set locked = 0 where locked = 1")?;
        Ok(stmt.execute([])?)
    }
}
