//! Extractor backed by a fixed dataset, for offline generation and tests.

use std::path::Path;

use async_trait::async_trait;

use super::{normalize_records, ExtractRequest, ExtractionError, Extractor};
use crate::models::Record;

/// Returns the same records for every request.
#[derive(Debug, Clone)]
pub struct StaticExtractor {
    records: Vec<Record>,
}

impl StaticExtractor {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Load records from a JSON file in any shape [`normalize_records`]
    /// accepts.
    pub fn from_json_file(path: &Path) -> Result<Self, ExtractionError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExtractionError::invalid_request(format!("cannot read {}: {}", path.display(), e))
        })?;
        let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            ExtractionError::invalid(format!("{} is not valid JSON: {}", path.display(), e))
        })?;
        Ok(Self::new(normalize_records(value)?))
    }
}

#[async_trait]
impl Extractor for StaticExtractor {
    fn name(&self) -> &str {
        "static"
    }

    async fn extract(&self, _request: &ExtractRequest<'_>) -> Result<Vec<Record>, ExtractionError> {
        Ok(self.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.json");
        std::fs::write(&path, r#"{"data": [{"id": "a"}, {"id": "b"}]}"#).unwrap();

        let extractor = StaticExtractor::from_json_file(&path).unwrap();
        assert_eq!(extractor.records.len(), 2);

        assert!(StaticExtractor::from_json_file(&dir.path().join("missing.json")).is_err());
    }
}
