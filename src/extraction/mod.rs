//! Extraction probe: fetch representative sample records for a source.
//!
//! The probe validates its inputs, calls a pluggable [`Extractor`] (the
//! Firecrawl HTTP client in production, a static dataset offline), retries
//! transient failures, and bounds the whole attempt by the caller's timeout.

mod firecrawl;
mod normalize;
mod static_source;

pub use firecrawl::{FirecrawlClient, FirecrawlConfig};
pub use normalize::normalize_records;
pub use static_source::StaticExtractor;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::models::{Record, SampleDataset, Secret};

/// Suffix marking "crawl discoverable pages under this path".
const WILDCARD_SUFFIX: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    /// Timeout, rate limit, or server-side hiccup. Safe to retry.
    Transient,
    /// The service answered with something that is not a record list.
    InvalidResponse,
    /// The service succeeded but returned no records.
    EmptyResult,
    /// The probe inputs violate its constraints (bad URL, blank intent).
    InvalidRequest,
}

impl ExtractionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionErrorKind::Transient => "TRANSIENT",
            ExtractionErrorKind::InvalidResponse => "INVALID_RESPONSE",
            ExtractionErrorKind::EmptyResult => "EMPTY_RESULT",
            ExtractionErrorKind::InvalidRequest => "INVALID_REQUEST",
        }
    }
}

impl fmt::Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub message: String,
}

impl ExtractionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionErrorKind::InvalidResponse,
            message: message.into(),
        }
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionErrorKind::EmptyResult,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionErrorKind::InvalidRequest,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ExtractionErrorKind::Transient
    }
}

/// A validated extraction target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTarget {
    pub url: Url,
    /// Crawl everything under `url` instead of a single page.
    pub wildcard: bool,
}

impl SourceTarget {
    /// Parse an absolute http(s) URL, optionally ending in `*`.
    pub fn parse(source_url: &str) -> Result<Self, ExtractionError> {
        let trimmed = source_url.trim();
        let (base, wildcard) = match trimmed.strip_suffix(WILDCARD_SUFFIX) {
            Some(base) => (base, true),
            None => (trimmed, false),
        };
        let url = Url::parse(base).map_err(|e| {
            ExtractionError::invalid_request(format!("invalid source URL '{}': {}", source_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ExtractionError::invalid_request(format!(
                "source URL must be an absolute http(s) URL: '{}'",
                source_url
            )));
        }
        Ok(Self { url, wildcard })
    }

    /// The URL as passed to the extraction service (wildcard restored).
    pub fn as_service_url(&self) -> String {
        if self.wildcard {
            format!("{}{}", self.url, WILDCARD_SUFFIX)
        } else {
            self.url.to_string()
        }
    }
}

/// Everything an extractor needs for one call.
#[derive(Debug)]
pub struct ExtractRequest<'a> {
    pub target: &'a SourceTarget,
    pub intent: &'a str,
    /// Optional pre-supplied JSON schema guiding structured extraction.
    pub schema_hint: Option<&'a Value>,
    pub api_key: Option<&'a Secret>,
}

/// External content-extraction capability.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Extract records from the target. One outbound call (plus polling for
    /// asynchronous crawl jobs); no persistence.
    async fn extract(&self, request: &ExtractRequest<'_>) -> Result<Vec<Record>, ExtractionError>;
}

/// Retry settings for transient extraction failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

/// Fetches sample data for a source through an [`Extractor`].
#[derive(Clone)]
pub struct ExtractionProbe {
    extractor: Arc<dyn Extractor>,
    retry: RetryPolicy,
}

impl ExtractionProbe {
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self {
            extractor,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Probe `source_url` for records matching `intent_text`.
    ///
    /// The whole attempt, retries included, is bounded by `timeout`; running
    /// out of time is a `TRANSIENT` error.
    pub async fn probe(
        &self,
        source_url: &str,
        intent_text: &str,
        schema_hint: Option<&Value>,
        api_key: Option<&Secret>,
        timeout: Duration,
    ) -> Result<SampleDataset, ExtractionError> {
        let target = SourceTarget::parse(source_url)?;
        if intent_text.trim().is_empty() {
            return Err(ExtractionError::invalid_request("intent text must not be empty"));
        }

        let request = ExtractRequest {
            target: &target,
            intent: intent_text,
            schema_hint,
            api_key,
        };

        info!(
            "Probing {} via {}{}",
            target.as_service_url(),
            self.extractor.name(),
            if target.wildcard { " (crawl)" } else { "" }
        );

        let records = tokio::time::timeout(timeout, self.extract_with_retries(&request))
            .await
            .map_err(|_| {
                ExtractionError::transient(format!(
                    "extraction timed out after {}s",
                    timeout.as_secs()
                ))
            })??;

        if records.is_empty() {
            return Err(ExtractionError::empty(format!(
                "no records extracted from {}",
                target.as_service_url()
            )));
        }

        debug!("Probe returned {} sample records", records.len());
        Ok(SampleDataset::new(records))
    }

    async fn extract_with_retries(
        &self,
        request: &ExtractRequest<'_>,
    ) -> Result<Vec<Record>, ExtractionError> {
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 0u32;
        loop {
            match self.extractor.extract(request).await {
                Ok(records) => return Ok(records),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        "Transient extraction failure (attempt {}/{}): {}; retrying in {:?}",
                        attempt,
                        self.retry.max_retries + 1,
                        e.message,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
