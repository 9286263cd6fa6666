//! HTTP fetch client
//!
//! One [`FetchClient`] per source wraps a shared `reqwest::Client` with the
//! source's token bucket, the retry policy, conditional requests and the
//! on-disk payload cache. Transient failures are retried internally; the
//! caller only ever sees a payload, `NotModified`, or a permanent error.

pub mod cache;
pub mod rate_limit;
pub mod retry;

use crate::config::SourceDescriptor;
use cache::{content_hash, CacheMeta, PayloadCache};
use chrono::{DateTime, Utc};
use mtg_common::SourceId;
use rate_limit::TokenBucket;
use reqwest::header::{ACCEPT, ETAG, IF_NONE_MATCH, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const ETAG_PREFIX: &str = "etag:";
const HASH_PREFIX: &str = "sha256:";

/// Fetch failures that reach the caller
#[derive(Debug, Error)]
pub enum FetchError {
    /// Worth retrying. Only surfaces from a single attempt, never from
    /// [`FetchClient::fetch`].
    #[error("transient fetch failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("permanent fetch failure: {message}")]
    Permanent {
        status: Option<u16>,
        message: String,
    },
}

impl FetchError {
    fn transient(message: impl Into<String>) -> Self {
        FetchError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    fn permanent(message: impl Into<String>) -> Self {
        FetchError::Permanent {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    /// HTTP status that caused a permanent failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Permanent { status, .. } => *status,
            FetchError::Transient { .. } => None,
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Opaque marker of an upstream payload's version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum VersionToken {
    /// Server-supplied entity tag, sent back as `If-None-Match`
    ETag(String),
    /// Hex SHA-256 of the payload body
    ContentHash(String),
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionToken::ETag(tag) => write!(f, "{}{}", ETAG_PREFIX, tag),
            VersionToken::ContentHash(hash) => write!(f, "{}{}", HASH_PREFIX, hash),
        }
    }
}

impl FromStr for VersionToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(tag) = s.strip_prefix(ETAG_PREFIX) {
            Ok(VersionToken::ETag(tag.to_string()))
        } else if let Some(hash) = s.strip_prefix(HASH_PREFIX) {
            Ok(VersionToken::ContentHash(hash.to_string()))
        } else {
            Err(format!("unrecognized version token '{}'", s))
        }
    }
}

impl From<VersionToken> for String {
    fn from(token: VersionToken) -> Self {
        token.to_string()
    }
}

impl TryFrom<String> for VersionToken {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Bytes of a successful fetch plus transport metadata
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub source: SourceId,
    pub resource: String,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
    /// HTTP attempts spent, zero when served from the cache offline
    pub attempts: u32,
}

impl RawPayload {
    /// Token to remember for the next conditional fetch: the ETag when the
    /// server sent one, the content hash otherwise
    pub fn version_token(&self) -> VersionToken {
        match &self.etag {
            Some(tag) => VersionToken::ETag(tag.clone()),
            None => VersionToken::ContentHash(self.content_hash.clone()),
        }
    }
}

/// Result of a fetch
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Payload(RawPayload),
    /// The upstream matches the conditional token
    NotModified,
}

/// Build the shared HTTP client
pub fn build_http_client(user_agent: &str, timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
}

enum Attempt {
    NotModified,
    Body { body: Vec<u8>, etag: Option<String> },
}

/// Rate-limited, retrying client for one source
pub struct FetchClient {
    descriptor: SourceDescriptor,
    http: Client,
    limiter: TokenBucket,
    retry: RetryPolicy,
    cache: Option<Arc<PayloadCache>>,
    offline: bool,
}

impl FetchClient {
    pub fn new(
        descriptor: SourceDescriptor,
        http: Client,
        retry: RetryPolicy,
        cache: Option<Arc<PayloadCache>>,
    ) -> Self {
        let limiter = TokenBucket::new(descriptor.rate_limit);
        Self {
            descriptor,
            http,
            limiter,
            retry,
            cache,
            offline: false,
        }
    }

    /// Serve payloads from the cache instead of the network
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn source(&self) -> SourceId {
        self.descriptor.id
    }

    /// Fetch the source's resource, optionally conditioned on a prior token.
    pub async fn fetch(&self, conditional: Option<&VersionToken>) -> FetchResult<FetchOutcome> {
        if self.offline {
            return self.fetch_cached(conditional);
        }

        let source = self.source();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.acquire().await;
            log::debug!("{}: GET {} (attempt {})", source, self.descriptor.url, attempt);

            match self.attempt_once(conditional).await {
                Ok(Attempt::NotModified) => {
                    log::info!("{}: upstream not modified (304)", source);
                    return Ok(FetchOutcome::NotModified);
                }
                Ok(Attempt::Body { body, etag }) => {
                    return Ok(self.finish(body, etag, attempt, conditional));
                }
                Err(FetchError::Transient { message, retry_after }) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(FetchError::permanent(format!(
                            "giving up after {} attempts: {}",
                            attempt, message
                        )));
                    }
                    let delay = self.retry.delay_for(attempt, retry_after);
                    log::warn!(
                        "{}: attempt {} failed ({}), retrying in {:?}",
                        source,
                        attempt,
                        message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(permanent) => return Err(permanent),
            }
        }
    }

    async fn attempt_once(&self, conditional: Option<&VersionToken>) -> FetchResult<Attempt> {
        let mut request = self
            .http
            .get(&self.descriptor.url)
            .header(ACCEPT, &self.descriptor.accept);
        if let Some(VersionToken::ETag(tag)) = conditional {
            request = request.header(IF_NONE_MATCH, tag);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(Attempt::NotModified);
        }

        if status.is_success() {
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await.map_err(classify_transport_error)?;
            return Ok(Attempt::Body {
                body: body.to_vec(),
                etag,
            });
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::Transient {
                message: "rate limited by upstream (429)".to_string(),
                retry_after,
            });
        }

        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            return Err(FetchError::transient(format!("HTTP {}", status)));
        }

        Err(FetchError::Permanent {
            status: Some(status.as_u16()),
            message: format!("HTTP {} from {}", status, self.descriptor.url),
        })
    }

    fn finish(
        &self,
        body: Vec<u8>,
        etag: Option<String>,
        attempts: u32,
        conditional: Option<&VersionToken>,
    ) -> FetchOutcome {
        let hash = content_hash(&body);
        if let Some(VersionToken::ContentHash(previous)) = conditional {
            if *previous == hash {
                log::info!("{}: payload hash unchanged", self.source());
                return FetchOutcome::NotModified;
            }
        }

        let payload = RawPayload {
            source: self.source(),
            resource: self.descriptor.resource_key(),
            body,
            etag,
            content_hash: hash,
            fetched_at: Utc::now(),
            attempts,
        };

        if let Some(cache) = &self.cache {
            let meta = CacheMeta {
                etag: payload.etag.clone(),
                content_hash: payload.content_hash.clone(),
                fetched_at: payload.fetched_at,
                len: payload.body.len() as u64,
            };
            cache.insert(payload.source, &payload.resource, &payload.body, &meta);
        }

        log::info!(
            "{}: fetched {} bytes in {} attempt(s)",
            payload.source,
            payload.body.len(),
            attempts
        );
        FetchOutcome::Payload(payload)
    }

    fn fetch_cached(&self, conditional: Option<&VersionToken>) -> FetchResult<FetchOutcome> {
        let source = self.source();
        let resource = self.descriptor.resource_key();
        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(source, &resource))
            .ok_or_else(|| {
                FetchError::permanent(format!(
                    "offline and no trusted cached payload for {}/{}",
                    source, resource
                ))
            })?;

        let unchanged = match conditional {
            Some(VersionToken::ETag(tag)) => cached.meta.etag.as_deref() == Some(tag.as_str()),
            Some(VersionToken::ContentHash(hash)) => *hash == cached.meta.content_hash,
            None => false,
        };
        if unchanged {
            log::info!("{}: cached payload matches stored version", source);
            return Ok(FetchOutcome::NotModified);
        }

        log::info!("{}: serving cached payload from {}", source, cached.meta.fetched_at);
        Ok(FetchOutcome::Payload(RawPayload {
            source,
            resource,
            body: cached.body,
            etag: cached.meta.etag,
            content_hash: cached.meta.content_hash,
            fetched_at: cached.meta.fetched_at,
            attempts: 0,
        }))
    }
}

fn classify_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_builder() || e.is_redirect() {
        return FetchError::permanent(e.to_string());
    }
    // Timeouts, refused connections and truncated bodies
    FetchError::transient(e.to_string())
}

#[cfg(test)]
#[path = "fetch_tests.rs"]
mod tests;
