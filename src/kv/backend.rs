// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The seam between the engine surface and where data lives.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::storage::{Row, ScanRange};

use super::commit::AtomicWrite;
use super::{CommitOutcome, Consistency, KvResult, QueueHandler};

/// Storage driven by a [`Kv`](super::Kv) handle: a local store plus its
/// background timers, or a remote database.
#[async_trait]
pub(crate) trait Backend: Send + Sync + 'static {
    async fn get_rows(
        &self,
        keys: Vec<Vec<u8>>,
        consistency: Consistency,
    ) -> KvResult<HashMap<Vec<u8>, Row>>;

    async fn scan(&self, range: ScanRange, consistency: Consistency) -> KvResult<Vec<Row>>;

    async fn commit(&self, write: AtomicWrite) -> KvResult<CommitOutcome>;

    /// Registers `handler` and waits until `cancel` fires.
    async fn listen_queue(
        &self,
        handler: Arc<dyn QueueHandler>,
        cancel: CancellationToken,
    ) -> KvResult<()>;

    async fn close(&self) -> KvResult<()>;
}
