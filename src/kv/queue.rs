// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Queue delivery.
//!
//! One item is in flight per database. A delivery claims the lowest-id
//! available item, hands the decoded payload to the registered handler and
//! then settles the item: deleted on success, retried with linear backoff
//! on failure, or written to its dead-letter keys once the attempt budget
//! is spent.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::storage::{KvStore, QueueItem};
use crate::value::{EncodedValue, KvValue, ValueCodec};

use super::commit::{apply_atomic_write, AppliedWrite, AtomicWrite, MutationOp, WriteMutation};
use super::{KvConfig, KvError, KvResult, Versionstamp};

/// Receives queued messages.
///
/// Returning an error, or panicking, counts as a failed delivery.
/// Implemented for any `Fn(KvValue) -> impl Future<Output = anyhow::Result<()>>`.
#[async_trait]
pub trait QueueHandler: Send + Sync + 'static {
    async fn handle(&self, value: KvValue) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> QueueHandler for F
where
    F: Fn(KvValue) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, value: KvValue) -> anyhow::Result<()> {
        (self)(value).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Claim {
    Item(QueueItem),
    /// Nothing available; carries the next `available_at`, if any.
    Idle(Option<i64>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Settled {
    Delivered,
    Retrying { available_at: i64 },
    DeadLettered { versionstamp: Option<Versionstamp> },
}

pub(crate) fn claim_next<S: KvStore>(store: &S, now: i64) -> KvResult<Claim> {
    store.run_atomic(|txn| {
        if let Some(item) = txn.claim_queue_item(now)? {
            return Ok::<_, KvError>(Claim::Item(item));
        }
        Ok(Claim::Idle(txn.next_queue_available_at()?))
    })
}

/// Runs the handler on `item`; `true` when it succeeded.
pub(crate) async fn deliver(
    handler: &dyn QueueHandler,
    item: &QueueItem,
    codec: &dyn ValueCodec,
) -> bool {
    let value = match KvValue::decode(item.encoding, &item.payload, codec) {
        Ok(value) => value,
        Err(err) => {
            warn!(id = item.id, error = %err, "undecodable queue payload");
            return false;
        }
    };
    match AssertUnwindSafe(handler.handle(value)).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(id = item.id, error = %err, "queue handler failed");
            false
        }
        Err(_) => {
            warn!(id = item.id, "queue handler panicked");
            false
        }
    }
}

pub(crate) fn settle<S: KvStore>(
    store: &S,
    item: &QueueItem,
    delivered: bool,
    config: &KvConfig,
    now: i64,
) -> KvResult<Settled> {
    if delivered {
        store.run_atomic(|txn| txn.delete_queue_item(item.id))?;
        debug!(id = item.id, "queue item delivered");
        return Ok(Settled::Delivered);
    }

    let failures = item.failure_count.saturating_add(1);
    if failures < config.max_queue_attempts {
        let backoff = i64::try_from(config.queue_backoff.as_millis()).unwrap_or(i64::MAX);
        let available_at = now.saturating_add(backoff.saturating_mul(i64::from(failures)));
        store.run_atomic(|txn| txn.requeue_item(item.id, failures, available_at))?;
        debug!(id = item.id, failures, available_at, "queue item will retry");
        return Ok(Settled::Retrying { available_at });
    }

    let versionstamp = store.run_atomic(|txn| {
        let keys = txn.dead_letter_keys(item.id)?;
        let mut versionstamp = None;
        if !keys.is_empty() {
            let payload = EncodedValue {
                encoding: item.encoding,
                data: item.payload.clone(),
            };
            let write = AtomicWrite {
                mutations: keys
                    .into_iter()
                    .map(|key| WriteMutation {
                        key,
                        op: MutationOp::Set {
                            value: payload.clone(),
                            expire_in: None,
                        },
                    })
                    .collect(),
                ..Default::default()
            };
            if let AppliedWrite::Committed { versionstamp: vs, .. } =
                apply_atomic_write(txn, &write, now)?
            {
                versionstamp = Some(vs);
            }
        }
        txn.delete_queue_item(item.id)?;
        Ok::<_, KvError>(versionstamp)
    })?;
    warn!(id = item.id, failures, "queue item dead-lettered");
    Ok(Settled::DeadLettered { versionstamp })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::storage::{MemoryStore, NewQueueItem, StorageError};
    use crate::value::{V8Codec, ValueEncoding};

    fn enqueue(store: &MemoryStore, payload: &[u8], dead_letter_keys: Vec<Vec<u8>>) -> i64 {
        store
            .run_atomic(|txn| {
                txn.insert_queue_item(NewQueueItem {
                    payload: payload.to_vec(),
                    encoding: ValueEncoding::Bytes,
                    enqueued_at: 0,
                    available_at: 0,
                    dead_letter_keys,
                })
            })
            .unwrap()
    }

    fn claimed(store: &MemoryStore, now: i64) -> QueueItem {
        match claim_next(store, now).unwrap() {
            Claim::Item(item) => item,
            Claim::Idle(_) => panic!("expected an item"),
        }
    }

    #[test]
    fn test_claim_reports_next_wakeup() {
        let store = MemoryStore::new();
        assert_eq!(claim_next(&store, 0).unwrap(), Claim::Idle(None));
        store
            .run_atomic(|txn| {
                txn.insert_queue_item(NewQueueItem {
                    payload: vec![],
                    encoding: ValueEncoding::Bytes,
                    enqueued_at: 0,
                    available_at: 40,
                    dead_letter_keys: vec![],
                })
            })
            .unwrap();
        assert_eq!(claim_next(&store, 10).unwrap(), Claim::Idle(Some(40)));
        assert!(matches!(claim_next(&store, 40).unwrap(), Claim::Item(_)));
    }

    #[test]
    fn test_success_deletes_item() {
        let store = MemoryStore::new();
        enqueue(&store, b"m", vec![]);
        let item = claimed(&store, 0);
        let settled = settle(&store, &item, true, &KvConfig::default(), 0).unwrap();
        assert_eq!(settled, Settled::Delivered);
        assert_eq!(claim_next(&store, i64::MAX).unwrap(), Claim::Idle(None));
    }

    #[test]
    fn test_failure_backs_off_linearly() {
        let store = MemoryStore::new();
        let config = KvConfig::default().with_queue_backoff(Duration::from_millis(1000));
        enqueue(&store, b"m", vec![]);

        let item = claimed(&store, 0);
        let settled = settle(&store, &item, false, &config, 100).unwrap();
        assert_eq!(settled, Settled::Retrying { available_at: 1_100 });

        let item = claimed(&store, 1_100);
        assert_eq!(item.failure_count, 1);
        let settled = settle(&store, &item, false, &config, 2_000).unwrap();
        assert_eq!(settled, Settled::Retrying { available_at: 4_000 });
    }

    #[test]
    fn test_exhausted_item_is_dead_lettered() {
        let store = MemoryStore::new();
        let config = KvConfig::default().with_max_queue_attempts(1);
        enqueue(&store, b"payload", vec![b"dlq-1".to_vec(), b"dlq-2".to_vec()]);

        let item = claimed(&store, 0);
        let settled = settle(&store, &item, false, &config, 0).unwrap();
        let Settled::DeadLettered { versionstamp: Some(vs) } = settled else {
            panic!("expected dead letter commit, got {settled:?}");
        };
        for key in [b"dlq-1".as_slice(), b"dlq-2".as_slice()] {
            let row = store.get_row(key).unwrap().unwrap();
            assert_eq!(row.value, b"payload");
            assert_eq!(row.encoding, ValueEncoding::Bytes);
            assert_eq!(row.versionstamp, vs);
        }
        assert_eq!(claim_next(&store, i64::MAX).unwrap(), Claim::Idle(None));
        let dlq = store
            .run_atomic(|txn| Ok::<_, StorageError>(txn.dead_letter_keys(item.id)?))
            .unwrap();
        assert!(dlq.is_empty());
    }

    #[tokio::test]
    async fn test_deliver_outcomes() {
        let codec = V8Codec;
        let item = QueueItem {
            id: 1,
            payload: b"x".to_vec(),
            encoding: ValueEncoding::Bytes,
            failure_count: 0,
            enqueued_at: 0,
            available_at: 0,
            locked: true,
        };

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let ok = move |value: KvValue| {
            let seen = Arc::clone(&seen);
            async move {
                assert_eq!(value, KvValue::Bytes(b"x".to_vec()));
                seen.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        };
        assert!(deliver(&ok, &item, &codec).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let failing = |_value: KvValue| async { Err::<(), _>(anyhow::anyhow!("nope")) };
        assert!(!deliver(&failing, &item, &codec).await);

        let panicking = |_value: KvValue| async {
            if true {
                panic!("handler bug");
            }
            anyhow::Ok(())
        };
        assert!(!deliver(&panicking, &item, &codec).await);

        let garbage = QueueItem {
            payload: vec![0x00],
            encoding: ValueEncoding::V8,
            ..item
        };
        assert!(!deliver(&ok, &garbage, &codec).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
