// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Database metadata exchange.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Url;
use serde::Deserialize;
use uuid::Uuid;

use crate::kv::Consistency;

use super::{RemoteError, RemoteResult};

/// Metadata is refreshed once it expires within this window.
const REFRESH_WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointConsistency {
    Strong,
    Eventual,
}

/// A data path endpoint; `url` never ends in `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub consistency: EndpointConsistency,
}

/// Validated metadata returned by the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseMetadata {
    pub version: u32,
    pub database_id: Uuid,
    pub endpoints: Vec<Endpoint>,
    /// Bearer token for data path requests.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawMetadata {
    version: u32,
    database_id: String,
    endpoints: Vec<RawEndpoint>,
    token: String,
    expires_at: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEndpoint {
    url: String,
    consistency: EndpointConsistency,
}

fn bad(reason: impl Into<String>) -> RemoteError {
    RemoteError::BadMetadata(reason.into())
}

/// Resolves an endpoint against the URL the metadata was served from.
fn resolve_endpoint(url: &str, response_url: &Url) -> RemoteResult<String> {
    let resolved = response_url
        .join(url)
        .map_err(|err| RemoteError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return Err(bad(format!("endpoint {url:?} is not http(s)")));
    }
    let path = resolved.path();
    if path != "/" && (path.ends_with('/') || resolved.query().is_some() || resolved.fragment().is_some()) {
        return Err(bad(format!("invalid endpoint url {url:?}")));
    }
    let mut resolved = resolved.to_string();
    if path == "/" {
        resolved.pop();
    }
    Ok(resolved)
}

impl DatabaseMetadata {
    /// Parses and validates an exchange response body.
    pub fn parse(body: &str, response_url: &str, supported_versions: &[u32]) -> RemoteResult<Self> {
        let raw: RawMetadata = serde_json::from_str(body)?;
        if !matches!(raw.version, 1 | 2) || !supported_versions.contains(&raw.version) {
            return Err(RemoteError::UnsupportedVersion(raw.version));
        }
        let database_id = Uuid::parse_str(&raw.database_id)
            .ok()
            .filter(|id| id.hyphenated().to_string() == raw.database_id)
            .ok_or_else(|| bad(format!("invalid database id {:?}", raw.database_id)))?;
        if raw.token.is_empty() {
            return Err(bad("empty token"));
        }
        if raw.endpoints.is_empty() {
            return Err(bad("no endpoints"));
        }
        let expires_at = DateTime::parse_from_rfc3339(&raw.expires_at)
            .map_err(|_| bad(format!("invalid expiresAt {:?}", raw.expires_at)))?
            .with_timezone(&Utc);
        let base = Url::parse(response_url).map_err(|err| RemoteError::InvalidUrl {
            url: response_url.to_string(),
            reason: err.to_string(),
        })?;
        let endpoints = raw
            .endpoints
            .into_iter()
            .map(|e| {
                Ok(Endpoint {
                    url: resolve_endpoint(&e.url, &base)?,
                    consistency: e.consistency,
                })
            })
            .collect::<RemoteResult<Vec<_>>>()?;
        Ok(Self {
            version: raw.version,
            database_id,
            endpoints,
            token: raw.token,
            expires_at,
        })
    }

    #[inline]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now < ChronoDuration::minutes(REFRESH_WINDOW_MINUTES)
    }

    /// Picks the endpoint serving `consistency`.
    ///
    /// Strong requests need a strong endpoint; eventual requests prefer an
    /// eventual one and fall back to strong.
    pub fn locate(&self, consistency: Consistency) -> RemoteResult<&Endpoint> {
        let first = |c: EndpointConsistency| self.endpoints.iter().find(|e| e.consistency == c);
        let endpoint = match consistency {
            Consistency::Strong => first(EndpointConsistency::Strong),
            Consistency::Eventual => {
                first(EndpointConsistency::Eventual).or_else(|| first(EndpointConsistency::Strong))
            }
        };
        endpoint.ok_or(RemoteError::NoEndpoint(match consistency {
            Consistency::Strong => "strong",
            Consistency::Eventual => "eventual",
        }))
    }
}
