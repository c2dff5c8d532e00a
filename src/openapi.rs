//! OpenAPI documents supplied alongside a source.
//!
//! Only what generation needs: summary fields for reports and the JSON
//! schema of a successful response, used as an extraction hint.

use serde::Serialize;
use serde_json::{Map, Value};

/// Nested `$ref`s deeper than this are left unresolved.
const MAX_REF_DEPTH: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum ApiSpecError {
    #[error("API spec is neither JSON nor YAML: {0}")]
    Parse(String),
    #[error("API spec is not an object")]
    NotAnObject,
}

/// A parsed OpenAPI document.
#[derive(Debug, Clone)]
pub struct ApiSpec {
    doc: Value,
}

/// Human-facing overview of an API spec.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApiSummary {
    pub title: String,
    pub version: String,
    pub base_url: String,
    pub endpoints: Vec<String>,
    pub auth_type: String,
}

impl ApiSpec {
    /// Parse JSON (when the text starts with `{`) or YAML.
    pub fn parse(text: &str) -> Result<Self, ApiSpecError> {
        let trimmed = text.trim_start();
        let doc: Value = if trimmed.starts_with('{') {
            serde_json::from_str(trimmed).map_err(|e| ApiSpecError::Parse(e.to_string()))?
        } else {
            serde_yaml::from_str(trimmed).map_err(|e| ApiSpecError::Parse(e.to_string()))?
        };
        if !doc.is_object() {
            return Err(ApiSpecError::NotAnObject);
        }
        Ok(Self { doc })
    }

    pub fn title(&self) -> &str {
        self.doc["info"]["title"].as_str().unwrap_or("Unknown API")
    }

    pub fn version(&self) -> &str {
        self.doc["info"]["version"].as_str().unwrap_or("1.0.0")
    }

    /// URL of the first server entry, or empty.
    pub fn base_url(&self) -> &str {
        self.doc["servers"][0]["url"].as_str().unwrap_or("")
    }

    /// Paths that have a GET or POST operation.
    pub fn endpoints(&self) -> Vec<&str> {
        self.paths()
            .map(|paths| {
                paths
                    .iter()
                    .filter(|(_, ops)| ops.get("get").is_some() || ops.get("post").is_some())
                    .map(|(path, _)| path.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Authentication style of the first security scheme.
    pub fn auth_type(&self) -> String {
        let Some(schemes) = self.doc["components"]["securitySchemes"].as_object() else {
            return "none".to_string();
        };
        let Some(scheme) = schemes.values().next() else {
            return "none".to_string();
        };
        match scheme["type"].as_str().map(str::to_lowercase).as_deref() {
            Some("http") => scheme["scheme"].as_str().unwrap_or("bearer").to_lowercase(),
            Some("apikey") => "api_key".to_string(),
            Some("oauth2") => "oauth2".to_string(),
            _ => "bearer_token".to_string(),
        }
    }

    /// JSON schema of the first 200/201 `application/json` response of
    /// `endpoint` (GET preferred over POST), with local `$ref`s resolved.
    pub fn response_schema(&self, endpoint: &str) -> Option<Value> {
        let ops = self.paths()?.get(endpoint)?;
        for method in ["get", "post"] {
            let Some(responses) = ops.get(method).and_then(|op| op.get("responses")) else {
                continue;
            };
            for status in ["200", "201"] {
                if let Some(schema) = responses[status]["content"]["application/json"].get("schema") {
                    return Some(self.resolve(schema, 0));
                }
            }
        }
        None
    }

    /// Record schema for guiding extraction: the first endpoint with a JSON
    /// response, with a top-level array unwrapped to its item schema.
    pub fn schema_hint(&self) -> Option<Value> {
        self.endpoints()
            .into_iter()
            .find_map(|endpoint| self.response_schema(endpoint))
            .map(|schema| match schema.get("items") {
                Some(items) if schema["type"] == "array" => items.clone(),
                _ => schema,
            })
    }

    pub fn summary(&self) -> ApiSummary {
        ApiSummary {
            title: self.title().to_string(),
            version: self.version().to_string(),
            base_url: self.base_url().to_string(),
            endpoints: self.endpoints().into_iter().map(String::from).collect(),
            auth_type: self.auth_type(),
        }
    }

    fn paths(&self) -> Option<&Map<String, Value>> {
        self.doc.get("paths")?.as_object()
    }

    fn resolve(&self, schema: &Value, depth: usize) -> Value {
        if depth > MAX_REF_DEPTH {
            return schema.clone();
        }
        match schema {
            Value::Object(map) => {
                if let Some(target) = map.get("$ref").and_then(Value::as_str) {
                    return match self.lookup_ref(target) {
                        Some(found) => self.resolve(found, depth + 1),
                        None => schema.clone(),
                    };
                }
                Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), self.resolve(v, depth + 1)))
                        .collect(),
                )
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve(v, depth + 1)).collect())
            }
            other => other.clone(),
        }
    }

    /// Follow a local JSON pointer such as `#/components/schemas/Item`.
    fn lookup_ref(&self, reference: &str) -> Option<&Value> {
        let pointer = reference.strip_prefix('#')?;
        self.doc.pointer(pointer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PETSTORE_YAML: &str = r##"
openapi: 3.0.0
info:
  title: Petstore
  version: 2.1.0
servers:
  - url: https://petstore.example.com/v1
paths:
  /pets:
    get:
      responses:
        "200":
          content:
            application/json:
              schema:
                type: array
                items:
                  $ref: "#/components/schemas/Pet"
  /health:
    head:
      responses: {}
components:
  securitySchemes:
    key:
      type: apiKey
      in: header
      name: X-Key
  schemas:
    Pet:
      type: object
      properties:
        id: {type: integer}
        owner:
          $ref: "#/components/schemas/Owner"
    Owner:
      type: object
      properties:
        name: {type: string}
"##;

    #[test]
    fn test_yaml_summary() {
        let spec = ApiSpec::parse(PETSTORE_YAML).unwrap();
        let summary = spec.summary();
        assert_eq!(summary.title, "Petstore");
        assert_eq!(summary.base_url, "https://petstore.example.com/v1");
        assert_eq!(summary.endpoints, vec!["/pets".to_string()]);
        assert_eq!(summary.auth_type, "api_key");
    }

    #[test]
    fn test_schema_hint_resolves_refs() {
        let spec = ApiSpec::parse(PETSTORE_YAML).unwrap();
        let hint = spec.schema_hint().unwrap();
        assert_eq!(hint["type"], "object");
        assert_eq!(hint["properties"]["id"]["type"], "integer");
        assert_eq!(hint["properties"]["owner"]["properties"]["name"]["type"], "string");
    }

    #[test]
    fn test_json_spec_and_auth() {
        let text = json!({
            "info": {"title": "T"},
            "paths": {"/a": {"post": {"responses": {"201": {"content": {"application/json": {"schema": {"type": "object"}}}}}}}},
            "components": {"securitySchemes": {"s": {"type": "http", "scheme": "Basic"}}}
        })
        .to_string();
        let spec = ApiSpec::parse(&text).unwrap();
        assert_eq!(spec.auth_type(), "basic");
        assert_eq!(spec.response_schema("/a"), Some(json!({"type": "object"})));
        assert_eq!(spec.base_url(), "");
    }

    #[test]
    fn test_self_referencing_schema_terminates() {
        let text = json!({
            "paths": {"/n": {"get": {"responses": {"200": {"content": {"application/json": {"schema": {"$ref": "#/components/schemas/Node"}}}}}}}},
            "components": {"schemas": {"Node": {"type": "object", "properties": {"next": {"$ref": "#/components/schemas/Node"}}}}}
        })
        .to_string();
        let spec = ApiSpec::parse(&text).unwrap();
        assert!(spec.schema_hint().is_some());
    }

    #[test]
    fn test_invalid_input() {
        assert!(ApiSpec::parse("{not json").is_err());
        assert!(matches!(ApiSpec::parse("- just\n- a list"), Err(ApiSpecError::NotAnObject)));
        assert!(ApiSpec::parse(": : :").is_err());
    }
}
