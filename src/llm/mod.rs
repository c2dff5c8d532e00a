//! LLM client for the field-description assistant.
//!
//! Supports the Ollama API for local inference and OpenAI-compatible chat
//! completion endpoints (OpenAI, Groq, Together).

mod config;
mod prompts;

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub use config::{LlmConfig, LlmProvider};

/// LLM client for schema documentation.
pub struct LlmClient {
    config: LlmConfig,
    client: Client,
}

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama API response format.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: String,
}

impl LlmClient {
    /// Create a new LLM client with the given configuration.
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Get the config.
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Describe each of `fields` given the user's intent and a JSON rendering
    /// of a few sample records. Returns field name to description; names
    /// the model made up are dropped here.
    pub async fn describe_fields(
        &self,
        intent: &str,
        fields: &[&str],
        samples_json: &str,
    ) -> Result<BTreeMap<String, String>, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }
        let prompt = self
            .config
            .get_describe_prompt()
            .replace("{intent}", intent.trim())
            .replace("{fields}", &fields.join(", "))
            .replace("{samples}", self.truncate_content(samples_json));

        debug!("Describing {} fields via {}", fields.len(), self.config.model);
        let response = self.call(&prompt).await?;

        let described = parse_descriptions(&response, fields)?;
        if described.is_empty() {
            return Err(LlmError::Parse("No field descriptions in response".to_string()));
        }
        Ok(described)
    }

    /// Truncate content to configured maximum (UTF-8 safe).
    fn truncate_content<'a>(&self, text: &'a str) -> &'a str {
        if text.len() <= self.config.max_content_chars {
            return text;
        }
        // Find a valid UTF-8 boundary at or before max_content_chars
        let mut end = self.config.max_content_chars;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }

    async fn call(&self, prompt: &str) -> Result<String, LlmError> {
        match self.config.provider {
            LlmProvider::Ollama => self.call_ollama(prompt).await,
            LlmProvider::OpenAI => self.call_openai(prompt).await,
        }
    }

    /// Call Ollama API with a prompt.
    async fn call_ollama(&self, prompt: &str) -> Result<String, LlmError> {
        let request = OllamaRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(),
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, body)));
        }

        let ollama_resp: OllamaResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(ollama_resp.response)
    }

    /// Call an OpenAI-compatible chat completion endpoint.
    async fn call_openai(&self, prompt: &str) -> Result<String, LlmError> {
        let key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::Api("No API key configured".to_string()))?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let url = format!(
            "{}/v1/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelNotFound(self.config.model.clone()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, body)));
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("Empty choices".to_string()))
    }
}

/// Parse a `{field: description}` object out of a model reply, keeping only
/// names in `fields`.
fn parse_descriptions(response: &str, fields: &[&str]) -> Result<BTreeMap<String, String>, LlmError> {
    // Models like to wrap JSON in prose or code fences
    let trimmed = response.trim();
    let body = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err(LlmError::Parse("No JSON object in response".to_string())),
    };
    let value: Value = serde_json::from_str(body).map_err(|e| LlmError::Parse(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(LlmError::Parse("Response is not an object".to_string()));
    };

    Ok(map
        .into_iter()
        .filter(|(name, _)| fields.contains(&name.as_str()))
        .filter_map(|(name, desc)| match desc {
            Value::String(s) if !s.trim().is_empty() => Some((name, s.trim().to_string())),
            _ => None,
        })
        .collect())
}

/// Errors that can occur during LLM operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Failed to connect to LLM service
    #[error("Connection error: {0}")]
    Connection(String),
    /// API returned an error
    #[error("API error: {0}")]
    Api(String),
    /// Failed to parse response
    #[error("Parse error: {0}")]
    Parse(String),
    /// Model not available
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    /// LLM is disabled
    #[error("LLM is disabled")]
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptions() {
        let fields = ["title", "price"];

        let parsed = parse_descriptions(
            r#"{"title": "Product name", "price": "Price in USD"}"#,
            &fields,
        )
        .unwrap();
        assert_eq!(parsed["price"], "Price in USD");

        // Fenced, with an invented field and a blank description
        let parsed = parse_descriptions(
            "```json\n{\"title\": \"Name\", \"rating\": \"Stars\", \"price\": \" \"}\n```",
            &fields,
        )
        .unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(!parsed.contains_key("rating"));

        assert!(parse_descriptions("no json here", &fields).is_err());
        assert!(parse_descriptions("{not json}", &fields).is_err());
    }

    #[test]
    fn test_truncate_content() {
        let mut config = LlmConfig::default();
        config.max_content_chars = 3;
        let client = LlmClient::new(config).unwrap();
        assert_eq!(client.truncate_content("abcdef"), "abc");
        assert_eq!(client.truncate_content("aé"), "aé");
        assert_eq!(client.truncate_content("aaé"), "aa");
    }

    #[tokio::test]
    async fn test_disabled_client_refuses() {
        let mut config = LlmConfig::default();
        config.enabled = false;
        let client = LlmClient::new(config).unwrap();
        let err = client.describe_fields("x", &["a"], "[]").await.unwrap_err();
        assert!(matches!(err, LlmError::Disabled));
    }
}
