// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Remote databases over the KV Connect protocol.
//!
//! A metadata exchange yields the protocol version, the data path
//! endpoints and a short-lived token. Reads go to an endpoint matching the
//! requested consistency, writes always go to a strong endpoint. Metadata
//! is refreshed shortly before it expires.

mod config;
mod error;
mod metadata;
pub mod proto;
mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::kv::{
    now_millis, AtomicWrite, Backend, CommitOutcome, Consistency, KvError, KvResult, MutationOp,
    QueueHandler, Versionstamp,
};
use crate::storage::{Row, ScanRange};
use crate::value::{EncodedValue, KvU64, ValueEncoding};

pub use config::{RemoteConfig, SUPPORTED_PROTOCOL_VERSIONS};
pub use error::{RemoteError, RemoteResult};
pub use metadata::{DatabaseMetadata, Endpoint, EndpointConsistency};
pub use transport::{HttpTransport, MetadataResponse, RequestContext, Transport};

/// Retry schedule sent with every remote enqueue, in milliseconds.
const ENQUEUE_BACKOFF_SCHEDULE: [u32; 4] = [100, 200, 400, 800];

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn proto_value(value: &EncodedValue) -> proto::KvValue {
    proto::KvValue {
        data: value.data.clone(),
        encoding: value.encoding.as_i32(),
    }
}

fn le64_value(v: KvU64) -> proto::KvValue {
    proto::KvValue {
        data: v.to_le_bytes().to_vec(),
        encoding: ValueEncoding::Le64.as_i32(),
    }
}

fn row_from_entry(entry: proto::KvEntry) -> KvResult<Row> {
    let stamp: [u8; 10] = entry
        .versionstamp
        .as_slice()
        .try_into()
        .map_err(|_| RemoteError::InvalidVersionstamp(entry.versionstamp.len()))?;
    Ok(Row {
        encoding: ValueEncoding::from_i32(entry.encoding)?,
        versionstamp: Versionstamp::from_bytes(&stamp),
        key: entry.key,
        value: entry.value,
        expires_at: None,
    })
}

/// Translates a commit into its wire form.
pub(crate) fn encode_write(write: &AtomicWrite, now: i64) -> KvResult<proto::AtomicWrite> {
    let checks = write
        .checks
        .iter()
        .map(|check| proto::Check {
            key: check.key.clone(),
            versionstamp: check
                .versionstamp
                .as_ref()
                .map(|vs| vs.to_bytes().to_vec())
                .unwrap_or_else(|| vec![0; 10]),
        })
        .collect();

    let mutations = write
        .mutations
        .iter()
        .map(|m| {
            let (mutation_type, value, expire_at_ms) = match &m.op {
                MutationOp::Set { value, expire_in } => (
                    proto::MutationType::Set,
                    Some(proto_value(value)),
                    expire_in.map_or(0, |d| now.saturating_add(millis(d))),
                ),
                MutationOp::Delete => (proto::MutationType::Clear, None, 0),
                MutationOp::Sum(v) => (proto::MutationType::Sum, Some(le64_value(*v)), 0),
                MutationOp::Min(v) => (proto::MutationType::Min, Some(le64_value(*v)), 0),
                MutationOp::Max(v) => (proto::MutationType::Max, Some(le64_value(*v)), 0),
            };
            proto::Mutation {
                key: m.key.clone(),
                value,
                mutation_type: mutation_type as i32,
                expire_at_ms,
            }
        })
        .collect();

    let enqueues = write
        .enqueues
        .iter()
        .map(|e| {
            if e.payload.encoding != ValueEncoding::V8 {
                return Err(KvError::from(RemoteError::UnsupportedPayload(
                    e.payload.encoding,
                )));
            }
            Ok(proto::Enqueue {
                payload: e.payload.data.clone(),
                deadline_ms: now.saturating_add(millis(e.delay)),
                keys_if_undelivered: e.dead_letter_keys.clone(),
                backoff_schedule: ENQUEUE_BACKOFF_SCHEDULE.to_vec(),
            })
        })
        .collect::<KvResult<Vec<_>>>()?;

    Ok(proto::AtomicWrite {
        checks,
        mutations,
        enqueues,
    })
}

/// Backend that forwards every operation to a remote database.
pub(crate) struct RemoteBackend<T: Transport = HttpTransport> {
    url: String,
    config: RemoteConfig,
    transport: T,
    metadata: RwLock<DatabaseMetadata>,
}

impl RemoteBackend<HttpTransport> {
    pub(crate) async fn connect(url: &str, config: RemoteConfig) -> KvResult<Self> {
        let transport = HttpTransport::new(config.max_retries, config.retry_backoff);
        Self::with_transport(url, config, transport).await
    }
}

impl<T: Transport> RemoteBackend<T> {
    pub(crate) async fn with_transport(url: &str, config: RemoteConfig, transport: T) -> KvResult<Self> {
        config.validate().map_err(KvError::InvalidConfig)?;
        let metadata = fetch_metadata(&transport, url, &config).await?;
        Ok(Self {
            url: url.to_string(),
            config,
            transport,
            metadata: RwLock::new(metadata),
        })
    }

    async fn refresh(&self) -> KvResult<()> {
        let metadata = fetch_metadata(&self.transport, &self.url, &self.config).await?;
        *self.metadata.write() = metadata;
        Ok(())
    }

    /// Resolves the endpoint for `consistency`, refreshing stale metadata first.
    async fn context(&self, consistency: Consistency) -> KvResult<RequestContext> {
        let stale = self.metadata.read().needs_refresh(chrono::Utc::now());
        if stale {
            debug!("database metadata expires soon, refreshing");
            self.refresh().await?;
        }
        let metadata = self.metadata.read();
        let endpoint = metadata.locate(consistency)?;
        Ok(RequestContext {
            endpoint: endpoint.url.clone(),
            token: metadata.token.clone(),
            database_id: metadata.database_id,
            version: metadata.version,
        })
    }

    async fn snapshot_read(
        &self,
        ranges: Vec<proto::ReadRange>,
        consistency: Consistency,
    ) -> KvResult<Vec<proto::ReadRangeOutput>> {
        let request = proto::SnapshotRead { ranges };
        let ctx = self.context(consistency).await?;
        let output = self.transport.snapshot_read(&ctx, request.clone()).await?;
        if !read_checks_failed(ctx.version, &output, consistency) {
            return Ok(output.ranges);
        }

        warn!(
            read_disabled = output.read_disabled,
            strongly_consistent = output.read_is_strongly_consistent,
            "snapshot read checks failed, refreshing metadata"
        );
        self.refresh().await?;
        let ctx = self.context(consistency).await?;
        let output = self.transport.snapshot_read(&ctx, request).await?;
        if read_checks_failed(ctx.version, &output, consistency) {
            return Err(RemoteError::ReadChecksFailed {
                read_disabled: output.read_disabled,
                strongly_consistent: output.read_is_strongly_consistent,
            }
            .into());
        }
        Ok(output.ranges)
    }
}

fn read_checks_failed(
    version: u32,
    output: &proto::SnapshotReadOutput,
    consistency: Consistency,
) -> bool {
    version > 1
        && (output.read_disabled
            || (consistency == Consistency::Strong && !output.read_is_strongly_consistent))
}

#[instrument(skip(transport, config))]
async fn fetch_metadata<T: Transport>(
    transport: &T,
    url: &str,
    config: &RemoteConfig,
) -> KvResult<DatabaseMetadata> {
    let response = transport
        .fetch_metadata(url, &config.access_token, &config.supported_versions)
        .await?;
    let metadata = DatabaseMetadata::parse(
        &response.body,
        &response.response_url,
        &config.supported_versions,
    )?;
    info!(
        version = metadata.version,
        endpoints = metadata.endpoints.len(),
        expires_at = %metadata.expires_at,
        "fetched database metadata"
    );
    Ok(metadata)
}

#[async_trait]
impl<T: Transport> Backend for RemoteBackend<T> {
    async fn get_rows(
        &self,
        keys: Vec<Vec<u8>>,
        consistency: Consistency,
    ) -> KvResult<HashMap<Vec<u8>, Row>> {
        let ranges = keys
            .iter()
            .map(|key| {
                let mut end = key.clone();
                end.push(0x00);
                proto::ReadRange {
                    start: key.clone(),
                    end,
                    limit: 1,
                    reverse: false,
                }
            })
            .collect();
        let outputs = self.snapshot_read(ranges, consistency).await?;
        let mut rows = HashMap::with_capacity(keys.len());
        for (key, output) in keys.into_iter().zip(outputs) {
            if let Some(entry) = output.values.into_iter().next() {
                rows.insert(key, row_from_entry(entry)?);
            }
        }
        Ok(rows)
    }

    async fn scan(&self, range: ScanRange, consistency: Consistency) -> KvResult<Vec<Row>> {
        let request = proto::ReadRange {
            start: range.start,
            end: range.end,
            limit: i32::try_from(range.limit).unwrap_or(i32::MAX),
            reverse: range.reverse,
        };
        let mut outputs = self.snapshot_read(vec![request], consistency).await?;
        let values = if outputs.is_empty() {
            Vec::new()
        } else {
            outputs.swap_remove(0).values
        };
        values.into_iter().map(row_from_entry).collect()
    }

    async fn commit(&self, write: AtomicWrite) -> KvResult<CommitOutcome> {
        let request = encode_write(&write, now_millis())?;
        let ctx = self.context(Consistency::Strong).await?;
        let output = self.transport.atomic_write(&ctx, request).await?;
        match output.status() {
            proto::AtomicWriteStatus::Success => {
                let stamp: [u8; 10] = output
                    .versionstamp
                    .as_slice()
                    .try_into()
                    .map_err(|_| RemoteError::InvalidVersionstamp(output.versionstamp.len()))?;
                Ok(CommitOutcome::Committed {
                    versionstamp: Versionstamp::from_bytes(&stamp),
                })
            }
            proto::AtomicWriteStatus::CheckFailure => Ok(CommitOutcome::CheckFailed),
            _ => Err(RemoteError::WriteFailed {
                status: output.status,
                primary_if_write_disabled: output.primary_if_write_disabled,
            }
            .into()),
        }
    }

    async fn listen_queue(
        &self,
        _handler: Arc<dyn QueueHandler>,
        _cancel: CancellationToken,
    ) -> KvResult<()> {
        Err(KvError::QueueUnsupported)
    }

    async fn close(&self) -> KvResult<()> {
        Ok(())
    }
}
