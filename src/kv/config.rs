// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Configuration for local databases.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::value::{V8Codec, ValueCodec};

use super::{KvError, KvResult};

/// Configuration applied when a database is opened.
#[derive(Clone)]
pub struct KvConfig {
    /// Serializer for structured values.
    pub codec: Arc<dyn ValueCodec>,
    /// Deliveries attempted before a queue item is dead-lettered.
    pub max_queue_attempts: u32,
    /// Retry delay per accumulated failure.
    pub queue_backoff: Duration,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            codec: Arc::new(V8Codec),
            max_queue_attempts: 10,
            queue_backoff: Duration::from_millis(1000),
        }
    }
}

impl fmt::Debug for KvConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvConfig")
            .field("max_queue_attempts", &self.max_queue_attempts)
            .field("queue_backoff", &self.queue_backoff)
            .finish_non_exhaustive()
    }
}

impl KvConfig {
    /// Replaces the structured value codec.
    pub fn with_codec(mut self, codec: impl ValueCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Sets the delivery budget per queue item.
    pub fn with_max_queue_attempts(mut self, attempts: u32) -> Self {
        self.max_queue_attempts = attempts;
        self
    }

    /// Sets the linear retry backoff unit.
    pub fn with_queue_backoff(mut self, backoff: Duration) -> Self {
        self.queue_backoff = backoff;
        self
    }

    pub(crate) fn validate(&self) -> KvResult<()> {
        if self.max_queue_attempts == 0 {
            return Err(KvError::InvalidConfig(
                "max_queue_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
