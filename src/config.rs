//! Configuration management.
//!
//! A config file (JSON, TOML or YAML) is found with `prefer` or passed
//! explicitly; every section falls back to defaults, and environment
//! variables override both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deploy::FivetranConfig;
use crate::extraction::{FirecrawlConfig, RetryPolicy};
use crate::llm::LlmConfig;
use crate::models::{Credentials, Secret};
use crate::pipeline::StageTimeouts;
use crate::synthesis::{Synthesizer, DEFAULT_MAX_STORABLE_BYTES, DEFAULT_TABLE_NAME};

/// Default directory holding one workspace per target.
pub const DEFAULT_WORKSPACE_DIR: &str = "./connectors";

/// Environment lookup; injectable so overrides can be tested without
/// touching the process environment.
type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Extraction service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Firecrawl API base URL
    #[serde(default = "default_firecrawl_endpoint")]
    pub endpoint: String,
    /// Firecrawl API key; without one, extraction runs unauthenticated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<Secret>,
    /// Upper bound on the whole probe, retries included
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Time the service waits for page scripts before scraping
    #[serde(default = "default_wait_for_ms")]
    pub wait_for_ms: u64,
    /// Delay between crawl job status checks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_firecrawl_endpoint() -> String {
    FirecrawlConfig::default().endpoint
}

fn default_extraction_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_wait_for_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    2000
}

/// Floor for one HTTP attempt, so a tight budget still allows a real request.
const MIN_ATTEMPT_SECS: u64 = 10;

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            endpoint: default_firecrawl_endpoint(),
            api_key: None,
            timeout_secs: default_extraction_timeout(),
            max_retries: default_max_retries(),
            wait_for_ms: default_wait_for_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ExtractionSettings {
    fn apply_env(&mut self, env: EnvLookup<'_>) {
        if let Some(key) = env("FIRECRAWL_API_KEY") {
            self.api_key = Some(Secret::new(key));
        }
        if let Some(url) = env("FIRECRAWL_API_URL") {
            self.endpoint = url;
        }
    }

    /// Timeout for one HTTP request: the probe budget split across the
    /// first attempt and its retries.
    pub fn attempt_timeout(&self) -> Duration {
        let budget = self.timeout_secs.max(1);
        let attempts = u64::from(self.max_retries) + 1;
        Duration::from_secs((budget / attempts).max(MIN_ATTEMPT_SECS).min(budget))
    }

    pub fn firecrawl_config(&self) -> FirecrawlConfig {
        FirecrawlConfig {
            endpoint: self.endpoint.clone(),
            timeout: self.attempt_timeout(),
            wait_for_ms: self.wait_for_ms,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}

/// Connector hosting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Connector SDK CLI binary
    #[serde(default = "default_cli")]
    pub cli: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Base64 of `api_key:api_secret`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<Secret>,
    #[serde(default = "default_deploy_timeout")]
    pub timeout_secs: u64,
    /// Start an initial sync after a successful deploy
    #[serde(default = "default_true")]
    pub trigger_sync: bool,
}

fn default_cli() -> String {
    FivetranConfig::default().cli
}

fn default_api_url() -> String {
    FivetranConfig::default().api_url
}

fn default_deploy_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            cli: default_cli(),
            api_url: default_api_url(),
            api_key: None,
            timeout_secs: default_deploy_timeout(),
            trigger_sync: true,
        }
    }
}

impl DeploySettings {
    fn apply_env(&mut self, env: EnvLookup<'_>) {
        // FIVETRAN_API_SECRET_BASE64 is the older name for the same value
        if let Some(key) =
            env(crate::deploy::DEPLOY_KEY_ENV).or_else(|| env("FIVETRAN_API_SECRET_BASE64"))
        {
            self.api_key = Some(Secret::new(key));
        }
        if let Some(url) = env("FIVETRAN_API_URL") {
            self.api_url = url;
        }
        if let Some(cli) = env("FIVETRAN_CLI") {
            self.cli = cli;
        }
    }

    pub fn fivetran_config(&self) -> FivetranConfig {
        FivetranConfig {
            cli: self.cli.clone(),
            api_url: self.api_url.clone(),
            ..FivetranConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisSettings {
    #[serde(default = "default_table_name")]
    pub default_table_name: String,
    /// Values larger than this are extracted but not stored
    #[serde(default = "default_max_storable_bytes")]
    pub max_storable_bytes: usize,
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_max_storable_bytes() -> usize {
    DEFAULT_MAX_STORABLE_BYTES
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            default_table_name: default_table_name(),
            max_storable_bytes: default_max_storable_bytes(),
        }
    }
}

impl SynthesisSettings {
    pub fn synthesizer(&self) -> Synthesizer {
        Synthesizer::new(&self.default_table_name, self.max_storable_bytes)
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one workspace per target (`~` is expanded;
    /// relative paths resolve against the config file's directory).
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
    #[serde(default)]
    pub extraction: ExtractionSettings,
    #[serde(default)]
    pub deploy: DeploySettings,
    /// AI field-description assistant.
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub synthesis: SynthesisSettings,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_workspace_dir() -> String {
    DEFAULT_WORKSPACE_DIR.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            extraction: ExtractionSettings::default(),
            deploy: DeploySettings::default(),
            llm: LlmConfig::default(),
            synthesis: SynthesisSettings::default(),
            source_path: None,
        }
        .with_env_overrides()
    }
}

impl Config {
    /// Load from `path` if given, otherwise discover a `pipewright` config
    /// file with `prefer`, otherwise use defaults.
    pub async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            return Self::load_from_path(path).await;
        }

        match prefer::load("pipewright").await {
            Ok(discovered) => match discovered.source_path() {
                Some(found) => {
                    tracing::debug!("Using config file {}", found.display());
                    Self::load_from_path(found).await
                }
                None => Ok(Self::default()),
            },
            Err(_) => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML, and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    fn parse(contents: &str, path: &Path) -> anyhow::Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let config = match ext {
            "toml" => toml::from_str(contents)
                .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| anyhow::anyhow!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(contents)
                .map_err(|e| anyhow::anyhow!("Failed to parse JSON config: {}", e))?,
        };
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// - `PIPEWRIGHT_WORKSPACE_DIR`
    /// - `FIRECRAWL_API_KEY`, `FIRECRAWL_API_URL`
    /// - `FIVETRAN_API_KEY_BASE64` (or `FIVETRAN_API_SECRET_BASE64`),
    ///   `FIVETRAN_API_URL`, `FIVETRAN_CLI`
    ///
    /// `LLM_*` variables are applied by [`LlmConfig`] itself.
    pub fn with_env_overrides(self) -> Self {
        self.with_env_from(&process_env)
    }

    fn with_env_from(mut self, env: EnvLookup<'_>) -> Self {
        if let Some(dir) = env("PIPEWRIGHT_WORKSPACE_DIR") {
            self.workspace_dir = dir;
        }
        self.extraction.apply_env(env);
        self.deploy.apply_env(env);
        self
    }

    /// Directory containing the config file, if one was loaded.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolved workspace root.
    pub fn workspace_root(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.workspace_dir);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.base_dir() {
            Some(base) => base.join(path),
            None => path.to_path_buf(),
        }
    }

    /// Credentials for one request. Copied out on every call.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.extraction.api_key.clone(), self.deploy.api_key.clone())
    }

    pub fn stage_timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            probe: Duration::from_secs(self.extraction.timeout_secs),
            describe: Duration::from_secs(self.llm.timeout_secs),
            deploy: Duration::from_secs(self.deploy.timeout_secs),
        }
    }

    /// Pretty JSON with every credential replaced by a redaction marker.
    pub fn to_redacted_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
