// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Expiry sweeps.
//!
//! Expired rows are not hidden from reads; they disappear at the first
//! sweep after their deadline.

use tracing::debug;

use crate::storage::KvStore;

use super::{KvError, KvResult};

/// Result of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Sweep {
    pub deleted: usize,
    /// Earliest expiry among surviving rows.
    pub next_expires_at: Option<i64>,
}

/// Deletes every row expired at `now` and reports the next deadline.
pub(crate) fn sweep<S: KvStore>(store: &S, now: i64) -> KvResult<Sweep> {
    let sweep = store.run_atomic(|txn| {
        let deleted = txn.delete_expired(now)?;
        let next_expires_at = txn.min_expires_at()?;
        Ok::<_, KvError>(Sweep {
            deleted,
            next_expires_at,
        })
    })?;
    if sweep.deleted > 0 {
        debug!(
            deleted = sweep.deleted,
            next = ?sweep.next_expires_at,
            "expired rows swept"
        );
    }
    Ok(sweep)
}
