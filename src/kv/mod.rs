// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The key-value engine.
//!
//! [`Kv`] is a cheaply cloneable handle over one database. Every write goes
//! through an atomic commit ([`AtomicOperation`]) that stamps the rows it
//! touches with a fresh [`Versionstamp`]; range reads go through
//! [`KvListIterator`]. Local databases also run two background timers, one
//! sweeping expired rows and one delivering queued messages to the handler
//! registered with [`Kv::listen_queue`].
//!
//! # Example
//!
//! ```no_run
//! use tuplekv::{kv_key, Kv, KvConfig, KvListOptions, KvListSelector};
//!
//! # async fn demo() -> tuplekv::KvResult<()> {
//! let kv = Kv::open_sqlite("/tmp/app.sqlite3", KvConfig::default()).await?;
//! kv.set(&kv_key!["users", 1i64], "alice").await?;
//!
//! let mut users = kv.list(KvListSelector::prefix(kv_key!["users"]), KvListOptions::default())?;
//! while let Some(entry) = users.next().await {
//!     let entry = entry?;
//!     println!("{} = {:?}", entry.key, entry.value);
//! }
//! kv.close().await?;
//! # Ok(())
//! # }
//! ```

mod atomic;
mod backend;
mod commit;
mod config;
mod error;
mod expirer;
mod list;
mod local;
mod queue;
mod timer;
mod versionstamp;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::key::{unpack_key, KvKey};
use crate::remote::{RemoteBackend, RemoteConfig, Transport};
use crate::storage::{KvStore, MemoryStore, RocksStore, Row, ScanRange, SqliteStore};
use crate::value::{KvValue, ValueCodec};

pub use atomic::{
    AtomicCheck, AtomicOperation, CommitOutcome, EnqueueOptions, KvMutation, MutationKind,
    SetOptions,
};
pub use config::KvConfig;
pub use error::{KvError, KvResult};
pub use list::{KvListIterator, KvListOptions, KvListSelector, DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};
pub use queue::QueueHandler;
pub use versionstamp::{Versionstamp, MAX_LOCAL_VERSION, VERSIONSTAMP_LEN};

pub(crate) use atomic::pack_non_empty;
pub(crate) use backend::Backend;
pub(crate) use commit::{AtomicWrite, MutationOp, WriteCheck, WriteEnqueue, WriteMutation};

/// Wall clock in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Read consistency requested from the backend.
///
/// Local stores are always strongly consistent; the remote backend may
/// serve eventual reads from a replica.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Consistency {
    #[default]
    Strong,
    Eventual,
}

/// An entry read from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    pub key: KvKey,
    pub value: KvValue,
    pub versionstamp: Versionstamp,
}

/// Result of a point read; `value` and `versionstamp` are `None` if absent.
#[derive(Debug, Clone, PartialEq)]
pub struct KvEntryMaybe {
    pub key: KvKey,
    pub value: Option<KvValue>,
    pub versionstamp: Option<Versionstamp>,
}

struct KvInner {
    backend: Arc<dyn Backend>,
    codec: Arc<dyn ValueCodec>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

/// Handle to an open database.
#[derive(Clone)]
pub struct Kv {
    inner: Arc<KvInner>,
}

impl std::fmt::Debug for Kv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kv")
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Kv {
    fn from_backend(backend: Arc<dyn Backend>, codec: Arc<dyn ValueCodec>) -> Self {
        Self {
            inner: Arc::new(KvInner {
                backend,
                codec,
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Opens a database over any [`KvStore`].
    pub async fn open_store<S: KvStore>(store: S, config: KvConfig) -> KvResult<Self> {
        let codec = Arc::clone(&config.codec);
        let backend = local::LocalBackend::open(store, config).await?;
        Ok(Self::from_backend(backend, codec))
    }

    /// Opens a transient in-memory database.
    pub async fn open_memory(config: KvConfig) -> KvResult<Self> {
        Self::open_store(MemoryStore::new(), config).await
    }

    /// Opens (or creates) a SQLite database file.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_sqlite(path: impl AsRef<Path>, config: KvConfig) -> KvResult<Self> {
        let path = path.as_ref().to_path_buf();
        let store = tokio::task::spawn_blocking(move || SqliteStore::open(path)).await??;
        info!("opened sqlite database");
        Self::open_store(store, config).await
    }

    /// Opens (or creates) a RocksDB database directory.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_rocks(path: impl AsRef<Path>, config: KvConfig) -> KvResult<Self> {
        let path = path.as_ref().to_path_buf();
        let store = tokio::task::spawn_blocking(move || RocksStore::open(path)).await??;
        info!("opened rocksdb database");
        Self::open_store(store, config).await
    }

    /// Connects to a remote database through its metadata endpoint.
    #[instrument(skip(config))]
    pub async fn open_remote(url: &str, config: RemoteConfig) -> KvResult<Self> {
        let codec = Arc::clone(&config.codec);
        let backend = RemoteBackend::connect(url, config).await?;
        info!("connected to remote database");
        Ok(Self::from_backend(Arc::new(backend), codec))
    }

    /// Connects to a remote database through a custom [`Transport`].
    pub async fn open_remote_with_transport<T: Transport>(
        url: &str,
        config: RemoteConfig,
        transport: T,
    ) -> KvResult<Self> {
        let codec = Arc::clone(&config.codec);
        let backend = RemoteBackend::with_transport(url, config, transport).await?;
        Ok(Self::from_backend(Arc::new(backend), codec))
    }

    #[inline]
    pub(crate) fn codec(&self) -> &dyn ValueCodec {
        self.inner.codec.as_ref()
    }

    fn ensure_open(&self, method: &'static str) -> KvResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed { method });
        }
        Ok(())
    }

    fn entry_from_row(&self, key: KvKey, row: Option<Row>) -> KvResult<KvEntryMaybe> {
        match row {
            Some(row) => Ok(KvEntryMaybe {
                value: Some(KvValue::decode(row.encoding, &row.value, self.codec())?),
                versionstamp: Some(row.versionstamp),
                key,
            }),
            None => Ok(KvEntryMaybe {
                key,
                value: None,
                versionstamp: None,
            }),
        }
    }

    /// Reads one key.
    pub async fn get(&self, key: &KvKey, consistency: Consistency) -> KvResult<KvEntryMaybe> {
        self.ensure_open("get")?;
        let packed = pack_non_empty(key)?;
        let mut rows = self
            .inner
            .backend
            .get_rows(vec![packed.clone()], consistency)
            .await?;
        self.entry_from_row(key.clone(), rows.remove(&packed))
    }

    /// Reads several keys, returning entries in request order.
    pub async fn get_many(
        &self,
        keys: &[KvKey],
        consistency: Consistency,
    ) -> KvResult<Vec<KvEntryMaybe>> {
        self.ensure_open("get_many")?;
        let packed = keys
            .iter()
            .map(pack_non_empty)
            .collect::<KvResult<Vec<_>>>()?;
        let rows = self
            .inner
            .backend
            .get_rows(packed.clone(), consistency)
            .await?;
        keys.iter()
            .zip(packed)
            .map(|(key, packed)| self.entry_from_row(key.clone(), rows.get(&packed).cloned()))
            .collect()
    }

    /// Writes a value, returning the commit's versionstamp.
    pub async fn set(&self, key: &KvKey, value: impl Into<KvValue>) -> KvResult<Versionstamp> {
        self.set_with_options(key, value, SetOptions::default()).await
    }

    pub async fn set_with_options(
        &self,
        key: &KvKey,
        value: impl Into<KvValue>,
        options: SetOptions,
    ) -> KvResult<Versionstamp> {
        self.ensure_open("set")?;
        let op = self.atomic().set_with_options(key.clone(), value, options)?;
        let outcome = self.commit_write(op.into_write(), "set").await?;
        outcome.versionstamp().cloned().ok_or(KvError::CheckFailed)
    }

    /// Deletes a key; deleting an absent key is not an error.
    pub async fn delete(&self, key: &KvKey) -> KvResult<()> {
        self.ensure_open("delete")?;
        let op = self.atomic().delete(key.clone())?;
        self.commit_write(op.into_write(), "delete").await?;
        Ok(())
    }

    /// Lists entries matching `selector`.
    pub fn list(
        &self,
        selector: KvListSelector,
        options: KvListOptions,
    ) -> KvResult<KvListIterator> {
        self.ensure_open("list")?;
        KvListIterator::new(self.clone(), &selector, options)
    }

    /// Enqueues a message for the registered queue handler.
    pub async fn enqueue(
        &self,
        value: impl Into<KvValue>,
        options: EnqueueOptions,
    ) -> KvResult<Versionstamp> {
        self.ensure_open("enqueue")?;
        let op = self.atomic().enqueue(value, options)?;
        let outcome = self.commit_write(op.into_write(), "enqueue").await?;
        outcome.versionstamp().cloned().ok_or(KvError::CheckFailed)
    }

    /// Starts an atomic operation.
    ///
    /// Allowed on a closed handle; the commit itself then fails.
    pub fn atomic(&self) -> AtomicOperation {
        AtomicOperation::new(self.clone())
    }

    /// Registers the queue handler and waits until the database is closed.
    ///
    /// Only one handler may be registered per database.
    pub async fn listen_queue(&self, handler: impl QueueHandler) -> KvResult<()> {
        self.ensure_open("listen_queue")?;
        self.inner
            .backend
            .listen_queue(Arc::new(handler), self.inner.cancel.clone())
            .await
    }

    /// Closes the database: stops background work, releases any queue
    /// listener and rejects further calls.
    #[instrument(skip(self))]
    pub async fn close(&self) -> KvResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(KvError::Closed { method: "close" });
        }
        self.inner.cancel.cancel();
        self.inner.backend.close().await?;
        info!("database closed");
        Ok(())
    }

    pub(crate) async fn scan(
        &self,
        range: ScanRange,
        consistency: Consistency,
        method: &'static str,
    ) -> KvResult<Vec<Row>> {
        self.ensure_open(method)?;
        self.inner.backend.scan(range, consistency).await
    }

    pub(crate) async fn commit_write(
        &self,
        write: AtomicWrite,
        method: &'static str,
    ) -> KvResult<CommitOutcome> {
        self.ensure_open(method)?;
        self.inner.backend.commit(write).await
    }
}

/// Decodes a stored row, for tools that read stores directly.
pub fn decode_row(row: &Row, codec: &dyn ValueCodec) -> KvResult<KvEntry> {
    Ok(KvEntry {
        key: unpack_key(&row.key)?,
        value: KvValue::decode(row.encoding, &row.value, codec)?,
        versionstamp: row.versionstamp.clone(),
    })
}
