// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Atomic commit application.
//!
//! A commit is validated and applied inside one storage transaction:
//! checks first, then a single version bump, then enqueues, then
//! mutations in the order they were added. Any error returned from here
//! rolls the whole transaction back.

use std::time::Duration;

use tracing::debug;

use crate::storage::{NewQueueItem, Row, StoreTxn};
use crate::value::{EncodedValue, KvU64, ValueEncoding};

use super::{KvError, KvResult, Versionstamp};

/// A commit with packed keys and encoded values.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct AtomicWrite {
    pub checks: Vec<WriteCheck>,
    pub mutations: Vec<WriteMutation>,
    pub enqueues: Vec<WriteEnqueue>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WriteCheck {
    pub key: Vec<u8>,
    /// `None` asserts the key is absent.
    pub versionstamp: Option<Versionstamp>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WriteMutation {
    pub key: Vec<u8>,
    pub op: MutationOp,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MutationOp {
    Set {
        value: EncodedValue,
        expire_in: Option<Duration>,
    },
    Delete,
    Sum(KvU64),
    Min(KvU64),
    Max(KvU64),
}

impl MutationOp {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            MutationOp::Set { .. } => "set",
            MutationOp::Delete => "delete",
            MutationOp::Sum(_) => "sum",
            MutationOp::Min(_) => "min",
            MutationOp::Max(_) => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WriteEnqueue {
    pub payload: EncodedValue,
    pub delay: Duration,
    pub dead_letter_keys: Vec<Vec<u8>>,
}

/// Result of applying a write to a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AppliedWrite {
    CheckFailed,
    Committed {
        versionstamp: Versionstamp,
        /// Earliest expiry set by this commit.
        min_expires_at: Option<i64>,
        /// Earliest availability among enqueued items.
        min_available_at: Option<i64>,
    },
}

fn earliest(current: Option<i64>, candidate: i64) -> Option<i64> {
    Some(current.map_or(candidate, |c| c.min(candidate)))
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Applies `write` against `txn` at wall-clock time `now` (epoch millis).
pub(crate) fn apply_atomic_write(
    txn: &mut dyn StoreTxn,
    write: &AtomicWrite,
    now: i64,
) -> KvResult<AppliedWrite> {
    for check in &write.checks {
        let current = txn.get_row(&check.key)?.map(|row| row.versionstamp);
        if current != check.versionstamp {
            debug!(key = ?check.key, "commit check failed");
            return Ok(AppliedWrite::CheckFailed);
        }
    }

    let version = txn.version()?.saturating_add(1);
    let versionstamp = Versionstamp::from_version(version)?;
    let mut min_available_at = None;
    let mut min_expires_at = None;

    for enqueue in &write.enqueues {
        let available_at = now.saturating_add(millis(enqueue.delay));
        txn.insert_queue_item(NewQueueItem {
            payload: enqueue.payload.data.clone(),
            encoding: enqueue.payload.encoding,
            enqueued_at: now,
            available_at,
            dead_letter_keys: enqueue.dead_letter_keys.clone(),
        })?;
        min_available_at = earliest(min_available_at, available_at);
    }

    for mutation in &write.mutations {
        match &mutation.op {
            MutationOp::Set { value, expire_in } => {
                let expires_at = expire_in.map(|d| now.saturating_add(millis(d)));
                if let Some(at) = expires_at {
                    min_expires_at = earliest(min_expires_at, at);
                }
                txn.put_row(Row {
                    key: mutation.key.clone(),
                    value: value.data.clone(),
                    encoding: value.encoding,
                    versionstamp: versionstamp.clone(),
                    expires_at,
                })?;
            }
            MutationOp::Delete => {
                txn.delete_row(&mutation.key)?;
            }
            MutationOp::Sum(operand) | MutationOp::Min(operand) | MutationOp::Max(operand) => {
                let (result, expires_at) = match txn.get_row(&mutation.key)? {
                    None => (*operand, None),
                    Some(row) => {
                        if row.encoding != ValueEncoding::Le64 {
                            return Err(KvError::NotU64 {
                                op: mutation.op.name(),
                            });
                        }
                        let existing = KvU64::from_le_slice(&row.value)?;
                        let combined = match mutation.op {
                            MutationOp::Sum(_) => existing.sum(*operand),
                            MutationOp::Min(_) => existing.min(*operand),
                            _ => existing.max(*operand),
                        };
                        (combined, row.expires_at)
                    }
                };
                txn.put_row(Row {
                    key: mutation.key.clone(),
                    value: result.to_le_bytes().to_vec(),
                    encoding: ValueEncoding::Le64,
                    versionstamp: versionstamp.clone(),
                    expires_at,
                })?;
            }
        }
    }

    txn.set_version(version)?;
    debug!(
        %versionstamp,
        mutations = write.mutations.len(),
        enqueues = write.enqueues.len(),
        "commit applied"
    );
    Ok(AppliedWrite::Committed {
        versionstamp,
        min_expires_at,
        min_available_at,
    })
}
