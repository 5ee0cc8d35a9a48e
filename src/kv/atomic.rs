// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Atomic operation builder.

use std::time::Duration;

use crate::key::KvKey;
use crate::value::{KvU64, KvValue};

use super::commit::{AtomicWrite, MutationOp, WriteCheck, WriteEnqueue, WriteMutation};
use super::{Kv, KvError, KvResult, Versionstamp};

/// Largest `expire_in` accepted, in milliseconds (2^53 - 1).
const MAX_EXPIRE_IN_MS: u128 = 9_007_199_254_740_991;

/// Asserts the versionstamp of a key at commit time.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicCheck {
    pub key: KvKey,
    /// Expected versionstamp; `None` asserts the key does not exist.
    pub versionstamp: Option<Versionstamp>,
}

impl AtomicCheck {
    pub fn new(key: KvKey, versionstamp: Option<Versionstamp>) -> Self {
        Self { key, versionstamp }
    }
}

/// One mutation within an atomic operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KvMutation {
    pub key: KvKey,
    pub kind: MutationKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    Set {
        value: KvValue,
        expire_in: Option<Duration>,
    },
    Delete,
    /// Wrapping addition.
    Sum(KvU64),
    Min(KvU64),
    Max(KvU64),
}

impl KvMutation {
    pub fn set(key: KvKey, value: impl Into<KvValue>) -> Self {
        Self {
            key,
            kind: MutationKind::Set {
                value: value.into(),
                expire_in: None,
            },
        }
    }

    pub fn delete(key: KvKey) -> Self {
        Self {
            key,
            kind: MutationKind::Delete,
        }
    }

    pub fn sum(key: KvKey, operand: impl Into<KvU64>) -> Self {
        Self {
            key,
            kind: MutationKind::Sum(operand.into()),
        }
    }

    pub fn min(key: KvKey, operand: impl Into<KvU64>) -> Self {
        Self {
            key,
            kind: MutationKind::Min(operand.into()),
        }
    }

    pub fn max(key: KvKey, operand: impl Into<KvU64>) -> Self {
        Self {
            key,
            kind: MutationKind::Max(operand.into()),
        }
    }
}

/// Options for [`Kv::set_with_options`] and [`AtomicOperation::set_with_options`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Time to live; the row is removed by the next sweep after it elapses.
    pub expire_in: Option<Duration>,
}

impl SetOptions {
    pub fn expire_in(expire_in: Duration) -> Self {
        Self {
            expire_in: Some(expire_in),
        }
    }
}

/// Options for enqueued messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueOptions {
    /// Delay before the first delivery attempt.
    pub delay: Duration,
    /// Keys that receive the payload if every delivery attempt fails.
    pub keys_if_undelivered: Vec<KvKey>,
}

impl EnqueueOptions {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_keys_if_undelivered(mut self, keys: Vec<KvKey>) -> Self {
        self.keys_if_undelivered = keys;
        self
    }
}

/// Outcome of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { versionstamp: Versionstamp },
    /// A check did not hold; nothing was written.
    CheckFailed,
}

impl CommitOutcome {
    #[inline]
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }

    pub fn versionstamp(&self) -> Option<&Versionstamp> {
        match self {
            CommitOutcome::Committed { versionstamp } => Some(versionstamp),
            CommitOutcome::CheckFailed => None,
        }
    }
}

pub(crate) fn pack_non_empty(key: &KvKey) -> KvResult<Vec<u8>> {
    if key.is_empty() {
        return Err(KvError::EmptyKey);
    }
    Ok(key.pack()?)
}

pub(crate) fn validate_expire_in(expire_in: Option<Duration>) -> KvResult<()> {
    match expire_in {
        Some(d) if d.is_zero() || d.as_millis() > MAX_EXPIRE_IN_MS => {
            Err(KvError::InvalidExpireIn)
        }
        _ => Ok(()),
    }
}

/// Batches checks, mutations and enqueues into one all-or-nothing commit.
///
/// Every builder method validates its input immediately. Nothing touches
/// storage until [`commit`](AtomicOperation::commit), which consumes the
/// builder.
///
/// ```no_run
/// # async fn demo(kv: tuplekv::Kv) -> tuplekv::KvResult<()> {
/// use tuplekv::{kv_key, AtomicCheck};
///
/// let entry = kv.get(&kv_key!["balance"], Default::default()).await?;
/// let outcome = kv
///     .atomic()
///     .check(AtomicCheck::new(entry.key, entry.versionstamp))?
///     .sum(kv_key!["balance"], 10u64)?
///     .commit()
///     .await?;
/// assert!(outcome.is_committed());
/// # Ok(())
/// # }
/// ```
#[must_use = "an atomic operation does nothing until committed"]
pub struct AtomicOperation {
    kv: Kv,
    write: AtomicWrite,
}

impl AtomicOperation {
    pub(crate) fn new(kv: Kv) -> Self {
        Self {
            kv,
            write: AtomicWrite::default(),
        }
    }

    pub fn check(mut self, check: AtomicCheck) -> KvResult<Self> {
        let key = pack_non_empty(&check.key)?;
        self.write.checks.push(WriteCheck {
            key,
            versionstamp: check.versionstamp,
        });
        Ok(self)
    }

    pub fn mutate(mut self, mutation: KvMutation) -> KvResult<Self> {
        let key = pack_non_empty(&mutation.key)?;
        let op = match mutation.kind {
            MutationKind::Set { value, expire_in } => {
                validate_expire_in(expire_in)?;
                MutationOp::Set {
                    value: value.encode(self.kv.codec())?,
                    expire_in,
                }
            }
            MutationKind::Delete => MutationOp::Delete,
            MutationKind::Sum(v) => MutationOp::Sum(v),
            MutationKind::Min(v) => MutationOp::Min(v),
            MutationKind::Max(v) => MutationOp::Max(v),
        };
        self.write.mutations.push(WriteMutation { key, op });
        Ok(self)
    }

    pub fn set(self, key: KvKey, value: impl Into<KvValue>) -> KvResult<Self> {
        self.mutate(KvMutation::set(key, value))
    }

    pub fn set_with_options(
        self,
        key: KvKey,
        value: impl Into<KvValue>,
        options: SetOptions,
    ) -> KvResult<Self> {
        self.mutate(KvMutation {
            key,
            kind: MutationKind::Set {
                value: value.into(),
                expire_in: options.expire_in,
            },
        })
    }

    pub fn delete(self, key: KvKey) -> KvResult<Self> {
        self.mutate(KvMutation::delete(key))
    }

    pub fn sum(self, key: KvKey, operand: impl Into<KvU64>) -> KvResult<Self> {
        self.mutate(KvMutation::sum(key, operand))
    }

    pub fn min(self, key: KvKey, operand: impl Into<KvU64>) -> KvResult<Self> {
        self.mutate(KvMutation::min(key, operand))
    }

    pub fn max(self, key: KvKey, operand: impl Into<KvU64>) -> KvResult<Self> {
        self.mutate(KvMutation::max(key, operand))
    }

    pub fn enqueue(mut self, value: impl Into<KvValue>, options: EnqueueOptions) -> KvResult<Self> {
        let payload = value.into().encode(self.kv.codec())?;
        let dead_letter_keys = options
            .keys_if_undelivered
            .iter()
            .map(pack_non_empty)
            .collect::<KvResult<Vec<_>>>()?;
        self.write.enqueues.push(WriteEnqueue {
            payload,
            delay: options.delay,
            dead_letter_keys,
        });
        Ok(self)
    }

    pub(crate) fn into_write(self) -> AtomicWrite {
        self.write
    }

    /// Applies the batch, or reports [`CommitOutcome::CheckFailed`].
    pub async fn commit(self) -> KvResult<CommitOutcome> {
        self.kv.commit_write(self.write, "commit").await
    }
}
