// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Ordered byte-keyed storage backends.
//!
//! The engine drives every store through the same contract: shared reads
//! ([`KvStore::get_row`], [`KvStore::get_rows`], [`KvStore::scan`]) and one
//! all-or-nothing transaction primitive ([`KvStore::run_atomic`]) exposing
//! row, version counter, expiry and queue operations through [`StoreTxn`].
//!
//! Three implementations ship with the crate:
//!
//! - [`MemoryStore`]: `BTreeMap`s behind a mutex, undo log for rollback
//! - [`SqliteStore`]: embedded SQLite database
//! - [`RocksStore`]: RocksDB with a prefixed keyspace and batched commits
//!
//! # Example
//!
//! ```no_run
//! use tuplekv::storage::{KvStore, SqliteStore, StorageError};
//!
//! let store = SqliteStore::open("/tmp/kv.sqlite3").unwrap();
//! let version = store.run_atomic(|txn| txn.version()).unwrap();
//! println!("last commit: {version}");
//! # Ok::<(), StorageError>(())
//! ```

mod error;
mod memory;
mod rocks;
mod sqlite;
mod store;

#[cfg(test)]
pub(crate) mod contract;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use rocks::{DurabilityMode, RocksStore};
pub use sqlite::SqliteStore;
pub use store::{
    validate_row, KvStore, NewQueueItem, QueueItem, Row, ScanRange, StoreTxn, MAX_KEY_SIZE,
    MAX_VALUE_SIZE,
};
