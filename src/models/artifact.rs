//! Generated connector artifact.

use serde_json::json;
use sha2::{Digest, Sha256};

use super::Secret;

/// Placeholder written when no extraction key is available (mock mode).
pub const PLACEHOLDER_EXTRACTION_KEY: &str = "YOUR_FIRECRAWL_API_KEY_HERE";

/// Python requirements pinned for generated connectors.
const DEFAULT_REQUIREMENTS: &[&str] = &["firecrawl-py==4.5.0"];

/// Dependency manifest (`requirements.txt`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyManifest {
    pub requirements: Vec<String>,
}

impl Default for DependencyManifest {
    fn default() -> Self {
        Self {
            requirements: DEFAULT_REQUIREMENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DependencyManifest {
    pub fn render(&self) -> String {
        let mut out = self.requirements.join("\n");
        out.push('\n');
        out
    }
}

/// The sensitive configuration object (`configuration.json`).
///
/// Carries the source URL and the extraction credential. Only the workspace
/// manager writes it, with restrictive permissions, and it is never part of
/// a shareable export.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub url: String,
    pub extraction_key: Option<Secret>,
}

impl ConnectorConfig {
    /// File contents with the credential exposed.
    pub fn render(&self) -> String {
        let key = self
            .extraction_key
            .as_ref()
            .map(|s| s.expose().to_string())
            .unwrap_or_else(|| PLACEHOLDER_EXTRACTION_KEY.to_string());
        let value = json!({
            "firecrawl_api_key": key,
            "url": self.url,
        });
        // serde_json cannot fail on a json! literal of strings
        serde_json::to_string_pretty(&value).unwrap_or_default() + "\n"
    }
}

/// Rendered connector module plus its companions.
///
/// Owned exclusively by the workspace of one target name and overwritten
/// wholesale on regeneration.
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub connector_source: String,
    pub readme: String,
    pub manifest: DependencyManifest,
    pub config: ConnectorConfig,
}

impl GeneratedArtifact {
    /// SHA-256 of the rendered connector source, hex encoded.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.connector_source.as_bytes()))
    }
}
