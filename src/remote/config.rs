// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Configuration for remote databases.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::value::{V8Codec, ValueCodec};

/// Protocol versions this client speaks.
pub const SUPPORTED_PROTOCOL_VERSIONS: [u32; 2] = [1, 2];

/// Configuration for [`Kv::open_remote`](crate::Kv::open_remote).
#[derive(Clone)]
pub struct RemoteConfig {
    /// Bearer token for the metadata exchange.
    pub access_token: String,
    /// Attempts for requests failing with a 5xx status or a connection error.
    pub max_retries: u32,
    /// First retry delay; doubled on every further attempt.
    pub retry_backoff: Duration,
    /// Protocol versions offered to the server.
    pub supported_versions: Vec<u32>,
    /// Serializer for structured values.
    pub codec: Arc<dyn ValueCodec>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            max_retries: 10,
            retry_backoff: Duration::from_millis(100),
            supported_versions: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
            codec: Arc::new(V8Codec),
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("access_token", &"<redacted>")
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("supported_versions", &self.supported_versions)
            .finish_non_exhaustive()
    }
}

impl RemoteConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_supported_versions(mut self, versions: Vec<u32>) -> Self {
        self.supported_versions = versions;
        self
    }

    pub fn with_codec(mut self, codec: impl ValueCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.supported_versions.is_empty() {
            return Err("supported_versions must not be empty".to_string());
        }
        if let Some(v) = self
            .supported_versions
            .iter()
            .find(|v| !SUPPORTED_PROTOCOL_VERSIONS.contains(v))
        {
            return Err(format!("protocol version {v} is not implemented"));
        }
        Ok(())
    }
}
