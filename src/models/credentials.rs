//! Opaque credential handles.

use std::fmt;

const REDACTED: &str = "********";

/// A sensitive string that never prints its contents.
///
/// `Debug` and `Display` both emit a redaction marker, so a `Secret` can sit
/// inside any struct that is logged or serialised into a report.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value. Call sites are the only places a credential
    /// leaves this wrapper (HTTP headers, CLI args, the configuration file).
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Short prefix for operator-facing summaries (`abcd1234...`).
    pub fn hint(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{}...", prefix)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl serde::Serialize for Secret {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> serde::Deserialize<'de> for Secret {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Secret(raw))
    }
}

/// Credential handles for one generation run.
///
/// Passed by value through the call chain; nothing caches these at process
/// scope.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Key for the content-extraction service. Also written into the
    /// generated connector's configuration file.
    pub extraction_key: Option<Secret>,
    /// Base64-encoded key for the connector-hosting service.
    pub deploy_key: Option<Secret>,
}

impl Credentials {
    pub fn new(extraction_key: Option<Secret>, deploy_key: Option<Secret>) -> Self {
        Self {
            extraction_key: extraction_key.filter(|s| !s.is_empty()),
            deploy_key: deploy_key.filter(|s| !s.is_empty()),
        }
    }

    /// Live mode requires a deployment key; without one the run is mock mode.
    pub fn is_live(&self) -> bool {
        self.deploy_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_never_prints() {
        let secret = Secret::new("sk-live-123456");
        assert_eq!(format!("{}", secret), REDACTED);
        assert!(!format!("{:?}", secret).contains("sk-live"));
        assert_eq!(
            serde_json::to_string(&secret).unwrap(),
            format!("\"{}\"", REDACTED)
        );
        assert_eq!(secret.hint(), "sk-l...");
    }

    #[test]
    fn test_blank_credentials_are_dropped() {
        let creds = Credentials::new(Some(Secret::new("  ")), Some(Secret::new("abc")));
        assert!(creds.extraction_key.is_none());
        assert!(creds.is_live());

        let mock = Credentials::new(None, Some(Secret::new("")));
        assert!(!mock.is_live());
    }
}
