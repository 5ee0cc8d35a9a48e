// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! HTTP transport for the metadata exchange and the data path.

use std::time::Duration;

use async_trait::async_trait;
use prost::Message;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use tracing::{debug, warn};
use uuid::Uuid;

use super::proto::{AtomicWrite, AtomicWriteOutput, SnapshotRead, SnapshotReadOutput};
use super::{RemoteError, RemoteResult};

/// Upper bound for a single retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Body and final URL (after redirects) of a metadata exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataResponse {
    pub body: String,
    pub response_url: String,
}

/// Addressing for one data path request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Endpoint base URL, without a trailing `/`.
    pub endpoint: String,
    pub token: String,
    pub database_id: Uuid,
    pub version: u32,
}

impl RequestContext {
    fn url(&self, action: &str) -> String {
        format!("{}/{action}", self.endpoint)
    }
}

/// Moves requests to a remote database.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn fetch_metadata(
        &self,
        url: &str,
        access_token: &str,
        supported_versions: &[u32],
    ) -> RemoteResult<MetadataResponse>;

    async fn snapshot_read(
        &self,
        ctx: &RequestContext,
        request: SnapshotRead,
    ) -> RemoteResult<SnapshotReadOutput>;

    async fn atomic_write(
        &self,
        ctx: &RequestContext,
        request: AtomicWrite,
    ) -> RemoteResult<AtomicWriteOutput>;
}

/// [`Transport`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    max_retries: u32,
    retry_backoff: Duration,
}

/// Delay before retry number `attempt` (0-based).
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(16);
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

#[inline]
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

fn media_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
}

async fn ensure_ok(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

impl HttpTransport {
    pub fn new(max_retries: u32, retry_backoff: Duration) -> Self {
        Self::with_client(Client::new(), max_retries, retry_backoff)
    }

    pub fn with_client(client: Client, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            client,
            max_retries,
            retry_backoff,
        }
    }

    async fn send(&self, build: impl Fn() -> RequestBuilder) -> RemoteResult<Response> {
        let mut attempt = 0;
        loop {
            let retry = match build().send().await {
                Ok(response) if is_retryable_status(response.status()) => {
                    if attempt >= self.max_retries {
                        return Ok(response);
                    }
                    format!("status {}", response.status())
                }
                Ok(response) => return Ok(response),
                Err(err) if is_retryable_error(&err) && attempt < self.max_retries => {
                    err.to_string()
                }
                Err(err) => return Err(err.into()),
            };
            let delay = backoff_delay(self.retry_backoff, attempt);
            warn!(attempt = attempt + 1, ?delay, reason = %retry, "retrying remote request");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn post_protobuf(&self, ctx: &RequestContext, action: &str, body: Vec<u8>) -> RemoteResult<Vec<u8>> {
        let url = ctx.url(action);
        debug!(%url, version = ctx.version, "remote data path request");
        let database_id = ctx.database_id.to_string();
        let response = self
            .send(|| {
                let request = self
                    .client
                    .post(&url)
                    .header(AUTHORIZATION, format!("Bearer {}", ctx.token))
                    .body(body.clone());
                if ctx.version == 1 {
                    request.header("x-transaction-domain-id", &database_id)
                } else {
                    request
                        .header("x-denokv-version", "2")
                        .header("x-denokv-database-id", &database_id)
                }
            })
            .await?;
        let response = ensure_ok(response).await?;
        match media_type(&response).as_deref() {
            Some("application/x-protobuf" | "application/protobuf") => {}
            _ => {
                return Err(RemoteError::UnexpectedContentType {
                    content_type: media_type(&response),
                })
            }
        }
        Ok(response.bytes().await?.to_vec())
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(100))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_metadata(
        &self,
        url: &str,
        access_token: &str,
        supported_versions: &[u32],
    ) -> RemoteResult<MetadataResponse> {
        Url::parse(url).map_err(|err| RemoteError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        let body = serde_json::to_vec(&serde_json::json!({ "supportedVersions": supported_versions }))?;
        let response = self
            .send(|| {
                self.client
                    .post(url)
                    .header(AUTHORIZATION, format!("Bearer {access_token}"))
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone())
            })
            .await?;
        let response = ensure_ok(response).await?;
        if media_type(&response).as_deref() != Some("application/json") {
            return Err(RemoteError::UnexpectedContentType {
                content_type: media_type(&response),
            });
        }
        let response_url = response.url().to_string();
        let body = response.text().await?;
        Ok(MetadataResponse { body, response_url })
    }

    async fn snapshot_read(
        &self,
        ctx: &RequestContext,
        request: SnapshotRead,
    ) -> RemoteResult<SnapshotReadOutput> {
        let bytes = self
            .post_protobuf(ctx, "snapshot_read", request.encode_to_vec())
            .await?;
        Ok(SnapshotReadOutput::decode(bytes.as_slice())?)
    }

    async fn atomic_write(
        &self,
        ctx: &RequestContext,
        request: AtomicWrite,
    ) -> RemoteResult<AtomicWriteOutput> {
        let bytes = self
            .post_protobuf(ctx, "atomic_write", request.encode_to_vec())
            .await?;
        Ok(AtomicWriteOutput::decode(bytes.as_slice())?)
    }
}
