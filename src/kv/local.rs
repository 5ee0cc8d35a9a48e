// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Backend over an embedded [`KvStore`].
//!
//! Store calls are synchronous and run on the blocking pool. Two timers
//! drive background work: the expirer sweeps expired rows and the worker
//! delivers queue items to the registered handler.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::storage::{KvStore, Row, ScanRange, StorageError};

use super::backend::Backend;
use super::commit::{apply_atomic_write, AppliedWrite, AtomicWrite};
use super::queue::{self, Claim, QueueHandler};
use super::timer::Timer;
use super::{expirer, now_millis, CommitOutcome, Consistency, KvConfig, KvError, KvResult};

/// Delay before background work retries after a storage failure.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Converts epoch millis to a timer deadline.
fn instant_at(at_ms: i64) -> Instant {
    let wait = u64::try_from(at_ms.saturating_sub(now_millis())).unwrap_or(0);
    Instant::now() + Duration::from_millis(wait)
}

async fn blocking<S, T, F>(store: &Arc<S>, f: F) -> KvResult<T>
where
    S: KvStore,
    T: Send + 'static,
    F: FnOnce(&S) -> KvResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref())).await?
}

pub(crate) struct LocalBackend<S: KvStore> {
    store: Arc<S>,
    config: KvConfig,
    expirer: Timer,
    worker: Timer,
    handler: Mutex<Option<Arc<dyn QueueHandler>>>,
}

impl<S: KvStore> LocalBackend<S> {
    /// Recovers queue locks, sweeps expired rows and starts the timers.
    pub(crate) async fn open(store: S, config: KvConfig) -> KvResult<Arc<Self>> {
        config.validate()?;
        let store = Arc::new(store);
        let now = now_millis();
        let (unlocked, sweep) = blocking(&store, move |s| {
            let unlocked = s.run_atomic(|txn| txn.unlock_all_queue_items())?;
            let sweep = expirer::sweep(s, now)?;
            Ok((unlocked, sweep))
        })
        .await?;
        if unlocked > 0 {
            info!(unlocked, "released queue items locked by a previous process");
        }

        let backend = Arc::new_cyclic(|weak: &Weak<Self>| {
            let expirer_ref = weak.clone();
            let expirer = Timer::spawn("expirer", move || {
                let backend = expirer_ref.clone();
                async move {
                    match backend.upgrade() {
                        Some(backend) => backend.run_sweep().await,
                        None => None,
                    }
                }
            });
            let worker_ref = weak.clone();
            let worker = Timer::spawn("queue", move || {
                let backend = worker_ref.clone();
                async move {
                    match backend.upgrade() {
                        Some(backend) => backend.run_dispatch().await,
                        None => None,
                    }
                }
            });
            Self {
                store,
                config,
                expirer,
                worker,
                handler: Mutex::new(None),
            }
        });
        if let Some(at) = sweep.next_expires_at {
            backend.expirer.schedule_earliest(instant_at(at));
        }
        Ok(backend)
    }

    async fn run_sweep(&self) -> Option<Instant> {
        let now = now_millis();
        match blocking(&self.store, move |s| expirer::sweep(s, now)).await {
            Ok(sweep) => sweep.next_expires_at.map(instant_at),
            Err(KvError::Storage(StorageError::Closed)) => None,
            Err(err) => {
                error!(error = %err, "expiry sweep failed");
                Some(Instant::now() + RETRY_DELAY)
            }
        }
    }

    async fn run_dispatch(&self) -> Option<Instant> {
        let handler = self.handler.lock().clone()?;
        match self.dispatch_once(handler.as_ref()).await {
            Ok(next) => next,
            Err(KvError::Storage(StorageError::Closed)) => None,
            Err(err) => {
                error!(error = %err, "queue dispatch failed");
                Some(Instant::now() + RETRY_DELAY)
            }
        }
    }

    async fn dispatch_once(&self, handler: &dyn QueueHandler) -> KvResult<Option<Instant>> {
        let now = now_millis();
        let item = match blocking(&self.store, move |s| queue::claim_next(s, now)).await? {
            Claim::Item(item) => item,
            Claim::Idle(next) => return Ok(next.map(instant_at)),
        };
        debug!(id = item.id, attempt = item.failure_count + 1, "dispatching queue item");
        let delivered = queue::deliver(handler, &item, self.config.codec.as_ref()).await;
        let config = self.config.clone();
        blocking(&self.store, move |s| {
            queue::settle(s, &item, delivered, &config, now_millis())
        })
        .await?;
        Ok(Some(Instant::now()))
    }
}

#[async_trait]
impl<S: KvStore> Backend for LocalBackend<S> {
    async fn get_rows(
        &self,
        keys: Vec<Vec<u8>>,
        _consistency: Consistency,
    ) -> KvResult<HashMap<Vec<u8>, Row>> {
        blocking(&self.store, move |s| Ok(s.get_rows(&keys)?)).await
    }

    async fn scan(&self, range: ScanRange, _consistency: Consistency) -> KvResult<Vec<Row>> {
        blocking(&self.store, move |s| Ok(s.scan(&range)?)).await
    }

    async fn commit(&self, write: AtomicWrite) -> KvResult<CommitOutcome> {
        let now = now_millis();
        let applied = blocking(&self.store, move |s| {
            s.run_atomic(|txn| apply_atomic_write(txn, &write, now))
        })
        .await?;
        match applied {
            AppliedWrite::CheckFailed => Ok(CommitOutcome::CheckFailed),
            AppliedWrite::Committed {
                versionstamp,
                min_expires_at,
                min_available_at,
            } => {
                if let Some(at) = min_expires_at {
                    self.expirer.schedule_earliest(instant_at(at));
                }
                if let Some(at) = min_available_at {
                    self.worker.schedule_earliest(instant_at(at));
                }
                Ok(CommitOutcome::Committed { versionstamp })
            }
        }
    }

    async fn listen_queue(
        &self,
        handler: Arc<dyn QueueHandler>,
        cancel: CancellationToken,
    ) -> KvResult<()> {
        {
            let mut slot = self.handler.lock();
            if slot.is_some() {
                return Err(KvError::HandlerAlreadyRegistered);
            }
            *slot = Some(handler);
        }
        debug!("queue handler registered");
        self.worker.schedule_now();
        cancel.cancelled().await;
        Ok(())
    }

    async fn close(&self) -> KvResult<()> {
        self.expirer.cancel();
        self.worker.cancel();
        self.handler.lock().take();
        blocking(&self.store, |s| Ok(s.close()?)).await
    }
}
