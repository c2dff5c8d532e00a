//! Human-readable field descriptions from an advisory assistant.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{verify_convergence, SchemaError};
use crate::llm::LlmClient;
use crate::models::{ExtractionSchema, SampleDataset, StorageSchema};

/// Records shown to the assistant.
const SAMPLE_RECORDS_FOR_PROMPT: usize = 3;

#[derive(Debug, thiserror::Error)]
#[error("field descriptions unavailable: {0}")]
pub struct DescribeError(pub String);

/// Advisory capability that explains fields in plain language.
///
/// Implementations have no side effects; a failure only means generic
/// descriptions are kept.
#[async_trait]
pub trait FieldDescriber: Send + Sync {
    async fn describe(
        &self,
        intent_text: &str,
        sample: &SampleDataset,
        schema: &ExtractionSchema,
    ) -> Result<BTreeMap<String, String>, DescribeError>;
}

/// [`FieldDescriber`] backed by the configured LLM.
pub struct LlmFieldDescriber {
    client: LlmClient,
}

impl LlmFieldDescriber {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FieldDescriber for LlmFieldDescriber {
    async fn describe(
        &self,
        intent_text: &str,
        sample: &SampleDataset,
        schema: &ExtractionSchema,
    ) -> Result<BTreeMap<String, String>, DescribeError> {
        let fields: Vec<&str> = schema.fields.keys().map(String::as_str).collect();
        let shown: Vec<_> = sample
            .records()
            .iter()
            .take(SAMPLE_RECORDS_FOR_PROMPT)
            .collect();
        let samples_json =
            serde_json::to_string_pretty(&shown).map_err(|e| DescribeError(e.to_string()))?;

        self.client
            .describe_fields(intent_text, &fields, &samples_json)
            .await
            .map_err(|e| DescribeError(e.to_string()))
    }
}

/// Replace descriptions of known fields, then re-check convergence.
///
/// Names absent from the schema and blank descriptions are ignored, so the
/// assistant can never add or drop a field.
pub fn apply_descriptions(
    mut extraction: ExtractionSchema,
    storage: &StorageSchema,
    descriptions: BTreeMap<String, String>,
) -> Result<ExtractionSchema, SchemaError> {
    for (name, description) in descriptions {
        let description = description.trim();
        if description.is_empty() {
            continue;
        }
        match extraction.fields.get_mut(&name) {
            Some(spec) => spec.description = description.to_string(),
            None => debug!("Ignoring description for unknown field '{}'", name),
        }
    }
    verify_convergence(&extraction, storage)?;
    Ok(extraction)
}

/// Ask `describer` for descriptions within `timeout`. On any failure the
/// generic descriptions already in `extraction` are kept.
pub async fn describe_with_fallback(
    describer: &dyn FieldDescriber,
    intent_text: &str,
    sample: &SampleDataset,
    extraction: ExtractionSchema,
    storage: &StorageSchema,
    timeout: Duration,
) -> Result<ExtractionSchema, SchemaError> {
    let outcome =
        tokio::time::timeout(timeout, describer.describe(intent_text, sample, &extraction)).await;
    match outcome {
        Ok(Ok(descriptions)) => apply_descriptions(extraction, storage, descriptions),
        Ok(Err(e)) => {
            warn!("{}; keeping generic descriptions", e);
            Ok(extraction)
        }
        Err(_) => {
            warn!(
                "Field description timed out after {}s; keeping generic descriptions",
                timeout.as_secs()
            );
            Ok(extraction)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use crate::synthesis::Synthesizer;
    use serde_json::json;

    struct Canned(Result<BTreeMap<String, String>, String>);

    #[async_trait]
    impl FieldDescriber for Canned {
        async fn describe(
            &self,
            _: &str,
            _: &SampleDataset,
            _: &ExtractionSchema,
        ) -> Result<BTreeMap<String, String>, DescribeError> {
            self.0.clone().map_err(DescribeError)
        }
    }

    struct Slow;

    #[async_trait]
    impl FieldDescriber for Slow {
        async fn describe(
            &self,
            _: &str,
            _: &SampleDataset,
            _: &ExtractionSchema,
        ) -> Result<BTreeMap<String, String>, DescribeError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(BTreeMap::new())
        }
    }

    fn schemas() -> (SampleDataset, ExtractionSchema, StorageSchema) {
        let records: Vec<Record> = vec![
            json!({"id": 1, "title": "A"}),
            json!({"id": 2, "title": "B"}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
        let sample = SampleDataset::new(records);
        let (e, s) = Synthesizer::default().synthesize(&sample, "posts").unwrap();
        (sample, e, s)
    }

    #[tokio::test]
    async fn test_descriptions_applied_to_known_fields_only() {
        let (sample, extraction, storage) = schemas();
        let mut canned = BTreeMap::new();
        canned.insert("title".to_string(), "Post headline".to_string());
        canned.insert("author".to_string(), "Invented".to_string());

        let described = describe_with_fallback(
            &Canned(Ok(canned)),
            "posts",
            &sample,
            extraction,
            &storage,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(described.get("title").unwrap().description, "Post headline");
        assert!(described.get("author").is_none());
        assert_eq!(described.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_generic_descriptions() {
        let (sample, extraction, storage) = schemas();
        let before = extraction.clone();

        let after = describe_with_fallback(
            &Canned(Err("offline".into())),
            "posts",
            &sample,
            extraction.clone(),
            &storage,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(after, before);

        let after = describe_with_fallback(
            &Slow,
            "posts",
            &sample,
            extraction,
            &storage,
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        assert_eq!(after, before);
    }
}
