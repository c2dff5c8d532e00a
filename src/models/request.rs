//! Generation request: the immutable input to one orchestrator run.

use thiserror::Error;

use super::Credentials;

/// Maximum length of a target name (used as a directory and connection name).
const MAX_TARGET_NAME_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Invalid target name '{0}': use letters, digits, '_' or '-', starting with a letter (max 64 chars)")]
    InvalidTargetName(String),
    #[error("Destination name must not be empty")]
    EmptyDestination,
}

/// Immutable description of what to generate.
///
/// Built once per invocation with [`GenerationRequest::new`] plus the
/// consuming `with_*` setters, then handed to the orchestrator by value.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    target_name: String,
    source_url: String,
    intent_text: String,
    destination_name: String,
    auto_deploy: bool,
    credentials: Credentials,
    api_spec: Option<String>,
    table_name: Option<String>,
}

impl GenerationRequest {
    pub fn new(
        target_name: impl Into<String>,
        source_url: impl Into<String>,
        intent_text: impl Into<String>,
        destination_name: impl Into<String>,
    ) -> Result<Self, RequestError> {
        let target_name = target_name.into();
        if !is_safe_identifier(&target_name) {
            return Err(RequestError::InvalidTargetName(target_name));
        }
        let destination_name = destination_name.into();
        if destination_name.trim().is_empty() {
            return Err(RequestError::EmptyDestination);
        }

        Ok(Self {
            target_name,
            source_url: source_url.into(),
            intent_text: intent_text.into(),
            destination_name,
            auto_deploy: false,
            credentials: Credentials::default(),
            api_spec: None,
            table_name: None,
        })
    }

    pub fn with_auto_deploy(mut self, auto_deploy: bool) -> Self {
        self.auto_deploy = auto_deploy;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Attach an OpenAPI document (JSON or YAML text) describing the source.
    pub fn with_api_spec(mut self, api_spec: impl Into<String>) -> Self {
        self.api_spec = Some(api_spec.into());
        self
    }

    /// Override the storage table name (otherwise the configured default).
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn intent_text(&self) -> &str {
        &self.intent_text
    }

    pub fn destination_name(&self) -> &str {
        &self.destination_name
    }

    pub fn auto_deploy(&self) -> bool {
        self.auto_deploy
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn api_spec(&self) -> Option<&str> {
        self.api_spec.as_deref()
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref()
    }
}

/// Whether a name is safe as both a directory name and a code identifier-ish
/// connection name.
pub(crate) fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    name.len() <= MAX_TARGET_NAME_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_name_validation() {
        assert!(is_safe_identifier("hn_jobs"));
        assert!(is_safe_identifier("shop-products2"));
        assert!(!is_safe_identifier(""));
        assert!(!is_safe_identifier("2fast"));
        assert!(!is_safe_identifier("../etc"));
        assert!(!is_safe_identifier("with space"));
        assert!(!is_safe_identifier(&"a".repeat(65)));
    }

    #[test]
    fn test_request_construction() {
        let req = GenerationRequest::new("books", "https://x.test/", "all books", "warehouse")
            .unwrap()
            .with_auto_deploy(true)
            .with_table_name("books");
        assert_eq!(req.target_name(), "books");
        assert!(req.auto_deploy());
        assert_eq!(req.table_name(), Some("books"));
        assert!(req.api_spec().is_none());

        assert_eq!(
            GenerationRequest::new("ok", "u", "i", " ").unwrap_err(),
            RequestError::EmptyDestination
        );
        assert!(matches!(
            GenerationRequest::new("no/slash", "u", "i", "d"),
            Err(RequestError::InvalidTargetName(_))
        ));
    }
}
