//! Firecrawl HTTP client.
//!
//! Single pages go through the synchronous scrape endpoint with a `json`
//! output format. Wildcard targets start an asynchronous extract job which is
//! polled until it finishes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{normalize_records, ExtractRequest, ExtractionError, Extractor};
use crate::models::Record;

/// Appended to every prompt so the service returns a small, uniformly
/// wrapped sample.
const SAMPLING_INSTRUCTION: &str = "Only fetch 2 results so the structure can be inspected. \
     Always return the results in the format {\"data\": [...]} where each element is one record.";

#[derive(Debug, Clone)]
pub struct FirecrawlConfig {
    /// Base URL, without the `/v2` suffix.
    pub endpoint: String,
    /// Per-request HTTP timeout. Keep it below the probe budget so a timed
    /// out attempt can still be retried.
    pub timeout: Duration,
    /// Milliseconds the service waits for page JavaScript before scraping.
    pub wait_for_ms: u64,
    /// Delay between extract job status checks.
    pub poll_interval: Duration,
}

impl Default for FirecrawlConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.firecrawl.dev".to_string(),
            timeout: Duration::from_secs(120),
            wait_for_ms: 2000,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Extraction capability backed by the Firecrawl API.
pub struct FirecrawlClient {
    config: FirecrawlConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<ScrapeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    #[serde(default)]
    json: Value,
}

#[derive(Debug, Deserialize)]
struct ExtractStarted {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

impl FirecrawlClient {
    pub fn new(config: FirecrawlConfig) -> Result<Self, ExtractionError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExtractionError::invalid_request(format!("HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn prompt(intent: &str) -> String {
        format!("{} {}", intent.trim(), SAMPLING_INSTRUCTION)
    }

    async fn scrape(
        &self,
        request: &ExtractRequest<'_>,
        key: &str,
    ) -> Result<Vec<Record>, ExtractionError> {
        let mut format = json!({
            "type": "json",
            "prompt": Self::prompt(request.intent),
        });
        if let Some(schema) = request.schema_hint {
            format["schema"] = schema.clone();
        }
        let body = json!({
            "url": request.target.as_service_url(),
            "formats": [format],
            "onlyMainContent": false,
            "timeout": self.config.timeout.as_millis() as u64,
            "blockAds": true,
            "waitFor": self.config.wait_for_ms,
            "proxy": "auto",
            "removeBase64Images": true,
        });

        let resp = self
            .client
            .post(self.api_url("scrape"))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp).await?;
        let parsed: ScrapeResponse = resp
            .json()
            .await
            .map_err(|e| body_error("scrape response", e))?;

        if !parsed.success {
            return Err(ExtractionError::invalid(
                parsed
                    .error
                    .unwrap_or_else(|| "scrape reported failure".to_string()),
            ));
        }
        let data = parsed
            .data
            .ok_or_else(|| ExtractionError::invalid("scrape response has no data"))?;
        normalize_records(data.json)
    }

    async fn extract_job(
        &self,
        request: &ExtractRequest<'_>,
        key: &str,
    ) -> Result<Vec<Record>, ExtractionError> {
        let mut body = json!({
            "urls": [request.target.as_service_url()],
            "prompt": Self::prompt(request.intent),
        });
        if let Some(schema) = request.schema_hint {
            body["schema"] = schema.clone();
        }

        let resp = self
            .client
            .post(self.api_url("extract"))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let started: ExtractStarted = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| body_error("extract response", e))?;

        let job_id = match (started.success, started.id) {
            (true, Some(id)) => id,
            (_, _) => {
                return Err(ExtractionError::invalid(
                    started
                        .error
                        .unwrap_or_else(|| "extract job was not accepted".to_string()),
                ))
            }
        };
        debug!("Started Firecrawl extract job {}", job_id);

        // The caller's timeout bounds this loop.
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            let resp = self
                .client
                .get(self.api_url(&format!("extract/{}", job_id)))
                .bearer_auth(key)
                .send()
                .await
                .map_err(transport_error)?;
            let status: ExtractStatus = check_status(resp)
                .await?
                .json()
                .await
                .map_err(|e| body_error("extract status", e))?;

            match status.status.as_str() {
                "completed" => return normalize_records(status.data),
                "failed" | "cancelled" => {
                    return Err(ExtractionError::invalid(format!(
                        "extract job {} {}: {}",
                        job_id,
                        status.status,
                        status.error.unwrap_or_default()
                    )))
                }
                other => debug!("Extract job {} is {}", job_id, other),
            }
        }
    }
}

#[async_trait]
impl Extractor for FirecrawlClient {
    fn name(&self) -> &str {
        "firecrawl"
    }

    async fn extract(&self, request: &ExtractRequest<'_>) -> Result<Vec<Record>, ExtractionError> {
        let key = request
            .api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ExtractionError::invalid_request("no Firecrawl API key configured"))?;

        if request.target.wildcard {
            self.extract_job(request, key.expose()).await
        } else {
            self.scrape(request, key.expose()).await
        }
    }
}

fn is_transient_transport(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
}

fn transport_error(e: reqwest::Error) -> ExtractionError {
    if is_transient_transport(&e) {
        ExtractionError::transient(e.to_string())
    } else {
        ExtractionError::invalid(e.to_string())
    }
}

/// A body that arrived whole but is not the expected JSON is the service's
/// fault. A body cut off by a timeout or a dropped connection is worth
/// retrying.
fn body_error(what: &str, e: reqwest::Error) -> ExtractionError {
    let malformed = std::error::Error::source(&e).is_some_and(|s| s.is::<serde_json::Error>());
    if malformed && !e.is_timeout() {
        ExtractionError::invalid(format!("undecodable {}: {}", what, e))
    } else {
        ExtractionError::transient(format!("reading {}: {}", what, e))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ExtractionError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = format!("HTTP {}: {}", status, truncate(&body, 300));
    if is_transient_status(status) {
        Err(ExtractionError::transient(message))
    } else {
        Err(ExtractionError::invalid(message))
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
