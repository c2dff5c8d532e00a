//! Artifact template engine.
//!
//! Rendering is two pure phases. `bind` resolves every `{{name}}`
//! placeholder to a Python literal; `validate` checks the result lexes as
//! Python and that each bound literal decodes back to its value. Nothing is
//! written anywhere until both pass.

mod python;
mod readme;

pub use readme::render_readme;

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::models::{
    ConnectorConfig, DependencyManifest, ExtractionSchema, GeneratedArtifact, GenerationRequest,
    StorageSchema,
};

const CONNECTOR_TEMPLATE: &str = include_str!("../../templates/connector.py.tmpl");

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderErrorKind {
    SyntaxInvalid,
}

impl RenderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderErrorKind::SyntaxInvalid => "SYNTAX_INVALID",
        }
    }
}

impl fmt::Display for RenderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} in template '{template}': {message}")]
pub struct RenderError {
    pub kind: RenderErrorKind,
    pub template: String,
    pub message: String,
}

impl RenderError {
    fn syntax(template: &str, message: impl Into<String>) -> Self {
        Self {
            kind: RenderErrorKind::SyntaxInvalid,
            template: template.to_string(),
            message: message.into(),
        }
    }
}

/// A parameterised connector module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    source: String,
}

impl Template {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// The built-in Firecrawl → Fivetran connector template.
    pub fn connector() -> Self {
        Self::new("connector.py", CONNECTOR_TEMPLATE)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder names used by this template, in order of first use.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        let mut rest = self.source.as_str();
        while let Some(start) = rest.find(OPEN) {
            let after = &rest[start + OPEN.len()..];
            match after.find(CLOSE) {
                Some(end) => {
                    let name = after[..end].trim();
                    if !seen.contains(&name) {
                        seen.push(name);
                    }
                    rest = &after[end + CLOSE.len()..];
                }
                None => break,
            }
        }
        seen
    }
}

/// Values substituted into a template.
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
    pub source_url: &'a str,
    pub intent_text: &'a str,
    pub extraction_schema: &'a ExtractionSchema,
    pub storage_schema: &'a StorageSchema,
}

impl Bindings<'_> {
    /// Raw (unescaped) value of each binding. Schemas are compact JSON with
    /// sorted keys, so equal schemas always give equal text.
    fn values(&self) -> Result<BTreeMap<&'static str, String>, serde_json::Error> {
        let mut values = BTreeMap::new();
        values.insert("source_url", self.source_url.to_string());
        values.insert("intent_text", self.intent_text.to_string());
        values.insert(
            "extraction_schema",
            serde_json::to_string(&self.extraction_schema.to_json_schema())?,
        );
        values.insert(
            "storage_schema",
            serde_json::to_string(&self.storage_schema.to_connector_json())?,
        );
        Ok(values)
    }
}

/// Render `template` with `bindings`. Pure: byte-identical output for equal
/// inputs.
pub fn render(template: &Template, bindings: &Bindings<'_>) -> Result<String, RenderError> {
    let values = bindings
        .values()
        .map_err(|e| RenderError::syntax(&template.name, format!("cannot encode schema: {}", e)))?;
    let literals: BTreeMap<&str, String> = values
        .iter()
        .map(|(name, value)| (*name, python::string_literal(value)))
        .collect();

    let rendered = bind(template, &literals)?;
    validate(template, &rendered, &values, &literals)?;

    debug!(
        "Rendered template '{}' ({} bytes)",
        template.name,
        rendered.len()
    );
    Ok(rendered)
}

/// Substitute every placeholder in a single left-to-right pass; bound text
/// is never rescanned.
fn bind(template: &Template, literals: &BTreeMap<&str, String>) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.source.len() + 1024);
    let mut rest = template.source.as_str();

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let end = after.find(CLOSE).ok_or_else(|| {
            RenderError::syntax(&template.name, "unclosed '{{' placeholder")
        })?;
        let name = after[..end].trim();
        let literal = literals.get(name).ok_or_else(|| {
            RenderError::syntax(&template.name, format!("unresolved placeholder '{}'", name))
        })?;
        out.push_str(literal);
        rest = &after[end + CLOSE.len()..];
    }
    out.push_str(rest);
    Ok(out)
}

fn validate(
    template: &Template,
    rendered: &str,
    values: &BTreeMap<&str, String>,
    literals: &BTreeMap<&str, String>,
) -> Result<(), RenderError> {
    python::check_syntax(rendered).map_err(|issue| {
        RenderError::syntax(
            &template.name,
            format!("line {}: {}", issue.line, issue.message),
        )
    })?;

    for (name, literal) in literals {
        let decoded = python::decode_string_literal(literal);
        if decoded.as_deref() != values.get(*name).map(String::as_str) {
            return Err(RenderError::syntax(
                &template.name,
                format!("binding '{}' does not survive encoding", name),
            ));
        }
    }

    // Embedded schemas must still be valid JSON once decoded.
    for name in ["extraction_schema", "storage_schema"] {
        if let Some(text) = values.get(name) {
            serde_json::from_str::<serde_json::Value>(text).map_err(|e| {
                RenderError::syntax(&template.name, format!("binding '{}': {}", name, e))
            })?;
        }
    }
    Ok(())
}

/// Render every file of a connector for `request`.
pub fn build_artifact(
    template: &Template,
    request: &GenerationRequest,
    extraction: &ExtractionSchema,
    storage: &StorageSchema,
) -> Result<GeneratedArtifact, RenderError> {
    let bindings = Bindings {
        source_url: request.source_url(),
        intent_text: request.intent_text(),
        extraction_schema: extraction,
        storage_schema: storage,
    };
    let connector_source = render(template, &bindings)?;
    let readme = render_readme(request, extraction, storage);

    Ok(GeneratedArtifact {
        connector_source,
        readme,
        manifest: DependencyManifest::default(),
        config: ConnectorConfig {
            url: request.source_url().to_string(),
            extraction_key: request.credentials().extraction_key.clone(),
        },
    })
}
