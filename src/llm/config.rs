//! LLM client configuration.

use serde::{Deserialize, Serialize};

use super::prompts::DEFAULT_DESCRIBE_PROMPT;
use crate::models::Secret;

/// LLM provider type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Ollama API (local, default)
    #[default]
    Ollama,
    /// OpenAI-compatible API (OpenAI, Groq, Together.ai, etc.)
    OpenAI,
}

impl LlmProvider {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "openai" | "groq" | "together" => Some(Self::OpenAI),
            _ => None,
        }
    }
}

/// Configuration for the field-description assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Whether AI field descriptions are enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// LLM provider (ollama or openai)
    #[serde(default)]
    pub provider: LlmProvider,
    /// API endpoint (provider-specific defaults apply)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// API key for OpenAI-compatible providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<Secret>,
    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens in response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature for generation (0.0 - 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Custom prompt (uses {intent}, {fields} and {samples} placeholders)
    #[serde(default)]
    pub describe_prompt: Option<String>,
    /// Maximum characters of sample JSON to send
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    /// Upper bound on one description call; past it synthesis falls back to
    /// generic descriptions
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_content_chars() -> usize {
    6000
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::base_default().with_env_overrides()
    }
}

impl LlmConfig {
    /// Base default without env overrides (used internally to avoid recursion).
    fn base_default() -> Self {
        Self {
            enabled: default_enabled(),
            provider: LlmProvider::default(),
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            describe_prompt: None,
            max_content_chars: default_max_content_chars(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `LLM_ENABLED`: "true" or "false"
    /// - `LLM_PROVIDER`: "ollama" (default), "openai", "groq", or "together"
    /// - `LLM_ENDPOINT`: API endpoint (defaults based on provider)
    /// - `LLM_API_KEY`: API key for OpenAI-compatible providers
    /// - `LLM_MODEL`: Model name
    /// - `LLM_MAX_TOKENS`: Maximum tokens in response
    /// - `LLM_TEMPERATURE`: Generation temperature (0.0-1.0)
    /// - `LLM_TIMEOUT_SECS`: Upper bound on one call
    /// - `LLM_DESCRIBE_PROMPT`: Custom field-description prompt
    ///
    /// Priority: LLM_PROVIDER wins over auto-detection from API keys.
    /// If LLM_PROVIDER=openai, uses OPENAI_API_KEY even if GROQ_API_KEY is set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("LLM_ENABLED") {
            self.enabled = val.eq_ignore_ascii_case("true") || val == "1";
        }

        // Check if provider is explicitly set - this is authoritative
        let explicit_provider = std::env::var("LLM_PROVIDER").ok();
        if let Some(ref val) = explicit_provider {
            if let Some(provider) = LlmProvider::parse(val) {
                self.provider = provider;
            }
        }

        let explicit_endpoint = std::env::var("LLM_ENDPOINT").ok();
        if let Some(ref endpoint) = explicit_endpoint {
            self.endpoint = endpoint.clone();
        }

        if let Ok(val) = std::env::var("LLM_API_KEY") {
            self.api_key = Some(Secret::new(val));
        }

        if let Some(ref provider_str) = explicit_provider {
            let provider_lower = provider_str.to_lowercase();

            if explicit_endpoint.is_none() {
                if let Some(endpoint) = provider_endpoint(&provider_lower) {
                    self.endpoint = endpoint.to_string();
                }
            }

            if self.api_key.is_none() {
                let var = match provider_lower.as_str() {
                    "groq" => Some("GROQ_API_KEY"),
                    "openai" => Some("OPENAI_API_KEY"),
                    // together uses LLM_API_KEY which we already checked
                    _ => None,
                };
                self.api_key = var.and_then(|v| std::env::var(v).ok()).map(Secret::new);
            }
        } else if self.api_key.is_none() {
            // No explicit provider - auto-detect from available keys
            for (var, provider) in [("GROQ_API_KEY", "groq"), ("OPENAI_API_KEY", "openai")] {
                if let Ok(key) = std::env::var(var) {
                    self.api_key = Some(Secret::new(key));
                    self.provider = LlmProvider::OpenAI;
                    if explicit_endpoint.is_none() {
                        if let Some(endpoint) = provider_endpoint(provider) {
                            self.endpoint = endpoint.to_string();
                        }
                    }
                    break;
                }
            }
        }

        if let Ok(val) = std::env::var("LLM_MODEL") {
            self.model = val;
        }
        if let Ok(val) = std::env::var("LLM_MAX_TOKENS") {
            if let Ok(n) = val.parse() {
                self.max_tokens = n;
            }
        }
        if let Ok(val) = std::env::var("LLM_TEMPERATURE") {
            if let Ok(t) = val.parse() {
                self.temperature = t;
            }
        }
        if let Ok(val) = std::env::var("LLM_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("LLM_DESCRIBE_PROMPT") {
            self.describe_prompt = Some(val);
        }
        self
    }

    /// Get the description prompt, using custom or default.
    pub fn get_describe_prompt(&self) -> &str {
        self.describe_prompt
            .as_deref()
            .unwrap_or(DEFAULT_DESCRIBE_PROMPT)
    }
}

fn provider_endpoint(provider: &str) -> Option<&'static str> {
    match provider {
        "groq" => Some("https://api.groq.com/openai"),
        "openai" => Some("https://api.openai.com"),
        "together" => Some("https://api.together.xyz"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(LlmProvider::parse("Groq"), Some(LlmProvider::OpenAI));
        assert_eq!(LlmProvider::parse("ollama"), Some(LlmProvider::Ollama));
        assert_eq!(LlmProvider::parse("bard"), None);
    }

    #[test]
    fn test_base_default() {
        let config = LlmConfig::base_default();
        assert!(config.enabled);
        assert!(config.describe_prompt.is_none());
        assert!(config.get_describe_prompt().contains("{fields}"));
    }
}
