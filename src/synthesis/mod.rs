//! Dual-schema synthesis.
//!
//! Derives the extraction schema and the storage schema from one pass over
//! the sample records, so both are projections of the same field set, then
//! checks that convergence explicitly before handing them on.

mod describe;
mod lattice;

pub use describe::{
    apply_descriptions, describe_with_fallback, DescribeError, FieldDescriber,
    LlmFieldDescriber,
};
pub use lattice::Inferred;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{ExtractionSchema, FieldSpec, SampleDataset, StorageSchema, TableSchema};

/// Default storage table name.
pub const DEFAULT_TABLE_NAME: &str = "items";

/// Values larger than this (serialised) are extracted but not stored.
pub const DEFAULT_MAX_STORABLE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    NoPrimaryKey,
    SchemaDivergence,
}

impl SchemaErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaErrorKind::NoPrimaryKey => "NO_PRIMARY_KEY",
            SchemaErrorKind::SchemaDivergence => "SCHEMA_DIVERGENCE",
        }
    }
}

impl fmt::Display for SchemaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

impl SchemaError {
    pub fn no_primary_key(message: impl Into<String>) -> Self {
        Self {
            kind: SchemaErrorKind::NoPrimaryKey,
            message: message.into(),
        }
    }

    pub fn divergence(message: impl Into<String>) -> Self {
        Self {
            kind: SchemaErrorKind::SchemaDivergence,
            message: message.into(),
        }
    }
}

/// What one pass over the samples learned about a field.
#[derive(Debug, Default)]
struct FieldStats {
    inferred: Option<Inferred>,
    /// Records where the field is present and non-null.
    present: usize,
    /// Holds an array or object in at least one record.
    composite: bool,
    oversized: bool,
    /// Canonical text of each non-null value, for key uniqueness.
    values: BTreeSet<String>,
}

impl FieldStats {
    fn observe(&mut self, value: &Value, max_bytes: usize) {
        let ty = Inferred::of(value);
        self.inferred = Some(match self.inferred {
            Some(prev) => prev.join(ty),
            None => ty,
        });
        if value.is_null() {
            return;
        }
        self.present += 1;
        self.composite |= value.is_array() || value.is_object();

        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.oversized |= text.len() > max_bytes;
        self.values.insert(text);
    }

    fn inferred(&self) -> Inferred {
        self.inferred.unwrap_or(Inferred::Unknown)
    }
}

/// Schema synthesizer. Pure: no I/O, and identical samples give identical
/// schemas.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    table_name: String,
    max_storable_bytes: usize,
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            max_storable_bytes: DEFAULT_MAX_STORABLE_BYTES,
        }
    }
}

impl Synthesizer {
    pub fn new(table_name: &str, max_storable_bytes: usize) -> Self {
        Self {
            table_name: sanitize_table_name(table_name),
            max_storable_bytes,
        }
    }

    pub fn with_table_name(mut self, table_name: &str) -> Self {
        self.table_name = sanitize_table_name(table_name);
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Infer both schemas from `sample`.
    ///
    /// `intent_text` only feeds the generic field descriptions; it never adds
    /// fields.
    pub fn synthesize(
        &self,
        sample: &SampleDataset,
        intent_text: &str,
    ) -> Result<(ExtractionSchema, StorageSchema), SchemaError> {
        let records = sample.records();
        let mut stats: BTreeMap<&str, FieldStats> = BTreeMap::new();
        for record in records {
            for (name, value) in record {
                stats
                    .entry(name.as_str())
                    .or_default()
                    .observe(value, self.max_storable_bytes);
            }
        }

        let mut extraction = ExtractionSchema::default();
        let mut columns = BTreeMap::new();
        for (name, field) in &stats {
            let column_type = field.inferred().column_type();
            let storable = !field.oversized;
            if !storable {
                warn!(
                    "Field '{}' exceeds {} bytes; extracting but not storing it",
                    name, self.max_storable_bytes
                );
            }
            extraction.fields.insert(
                name.to_string(),
                FieldSpec {
                    field_type: column_type.field_type(),
                    description: generic_description(name, intent_text),
                    required: !records.is_empty() && field.present == records.len(),
                    storable,
                },
            );
            if storable {
                columns.insert(name.to_string(), column_type);
            }
        }

        let primary_key = select_primary_key(&stats, &extraction, records.len())?;
        debug!(
            "Synthesized {} fields, primary key '{}'",
            extraction.len(),
            primary_key
        );

        let storage = StorageSchema::single(TableSchema {
            table_name: self.table_name.clone(),
            primary_key: vec![primary_key],
            columns,
        });

        verify_convergence(&extraction, &storage)?;
        Ok((extraction, storage))
    }
}

/// Rank of a field name as a key candidate; lower is better.
fn key_name_rank(name: &str) -> Option<u8> {
    if name == "id" {
        Some(0)
    } else if name == "url" {
        Some(1)
    } else if name.ends_with("_id") {
        Some(2)
    } else if name.ends_with("_url") {
        Some(3)
    } else {
        None
    }
}

/// Pick the primary key: a required, storable, scalar field named like a key.
/// Among candidates, values unique across the sample beat duplicates, then
/// name rank, then alphabetical order.
fn select_primary_key(
    stats: &BTreeMap<&str, FieldStats>,
    extraction: &ExtractionSchema,
    record_count: usize,
) -> Result<String, SchemaError> {
    let mut candidates: Vec<(bool, u8, &str)> = stats
        .iter()
        .filter_map(|(name, field)| {
            let rank = key_name_rank(name)?;
            let spec = extraction.get(name)?;
            // any scalar type works as a key; nested values do not
            let keyable = spec.required && spec.storable && !field.composite;
            if !keyable {
                return None;
            }
            let duplicated = field.values.len() < record_count;
            Some((duplicated, rank, *name))
        })
        .collect();
    candidates.sort();

    match candidates.first() {
        Some(&(duplicated, _, name)) => {
            if duplicated {
                warn!("Primary key '{}' has duplicate values in the sample", name);
            }
            Ok(name.to_string())
        }
        None => Err(SchemaError::no_primary_key(format!(
            "no field named 'id' or 'url', or ending in '_id'/'_url', is present in all {} sample records",
            record_count
        ))),
    }
}

/// Check that the storage schema is the storable projection of the
/// extraction schema.
pub fn verify_convergence(
    extraction: &ExtractionSchema,
    storage: &StorageSchema,
) -> Result<(), SchemaError> {
    if storage.tables.is_empty() {
        return Err(SchemaError::divergence("storage schema has no tables"));
    }

    let mut stored: BTreeSet<&str> = BTreeSet::new();
    for table in &storage.tables {
        if table.primary_key.is_empty() {
            return Err(SchemaError::divergence(format!(
                "table '{}' has no primary key",
                table.table_name
            )));
        }
        for (column, ty) in &table.columns {
            let spec = extraction.get(column).ok_or_else(|| {
                SchemaError::divergence(format!(
                    "column '{}.{}' is not in the extraction schema",
                    table.table_name, column
                ))
            })?;
            if !ty.is_compatible_with(spec.field_type) {
                return Err(SchemaError::divergence(format!(
                    "column '{}' is {} but extracted as {}",
                    column,
                    ty.as_str(),
                    spec.field_type.as_str()
                )));
            }
            stored.insert(column.as_str());
        }
        for key in &table.primary_key {
            if !table.columns.contains_key(key) {
                return Err(SchemaError::divergence(format!(
                    "primary key '{}' is not a column of '{}'",
                    key, table.table_name
                )));
            }
            if !extraction.get(key).is_some_and(|spec| spec.required) {
                return Err(SchemaError::divergence(format!(
                    "primary key '{}' is not required in the extraction schema",
                    key
                )));
            }
        }
    }

    let storable = extraction.storable_fields();
    if stored != storable {
        let missing: Vec<&str> = storable.difference(&stored).copied().collect();
        return Err(SchemaError::divergence(format!(
            "storable fields without a column: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Description used when no assistant is available.
fn generic_description(name: &str, intent_text: &str) -> String {
    let label = name.replace(['_', '-'], " ");
    let intent = intent_text.trim();
    if intent.is_empty() {
        label
    } else {
        format!("{} of each record extracted for: {}", label, intent)
    }
}

fn sanitize_table_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    match cleaned.chars().next() {
        None => DEFAULT_TABLE_NAME.to_string(),
        Some(c) if c.is_ascii_digit() => format!("t_{}", cleaned),
        Some(_) => cleaned.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnType, FieldType, Record};
    use serde_json::json;

    fn sample(values: Value) -> SampleDataset {
        let records: Vec<Record> = match values {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        SampleDataset::new(records)
    }

    #[test]
    fn test_product_example() {
        let sample = sample(json!([
            {"url": "https://x/1", "title": "A", "price": 9.99},
            {"url": "https://x/2", "title": "B", "price": 19.5}
        ]));
        let (extraction, storage) = Synthesizer::default().synthesize(&sample, "products").unwrap();

        let table = &storage.tables[0];
        assert_eq!(table.table_name, "items");
        assert_eq!(table.primary_key, vec!["url".to_string()]);
        assert_eq!(table.columns["url"], ColumnType::String);
        assert_eq!(table.columns["title"], ColumnType::String);
        assert_eq!(table.columns["price"], ColumnType::Float);
        assert_eq!(table.columns.len(), 3);

        assert!(extraction.get("url").unwrap().required);
        assert_eq!(extraction.get("price").unwrap().field_type, FieldType::Number);
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let sample = sample(json!([
            {"z_id": 1, "b": true, "a": "x", "when": "2024-01-01"},
            {"when": "2024-02-01", "a": "y", "b": false, "z_id": 2}
        ]));
        let synth = Synthesizer::default();
        let first = synth.synthesize(&sample, "things").unwrap();
        let second = synth.synthesize(&sample, "things").unwrap();
        assert_eq!(
            serde_json::to_string(&first.0).unwrap(),
            serde_json::to_string(&second.0).unwrap()
        );
        assert_eq!(
            serde_json::to_string(&first.1).unwrap(),
            serde_json::to_string(&second.1).unwrap()
        );
        assert_eq!(first.1.tables[0].columns["when"], ColumnType::Timestamp);
    }

    #[test]
    fn test_type_conflict_defaults_to_string() {
        let sample = sample(json!([
            {"id": 1, "v": 3},
            {"id": 2, "v": "three"},
            {"id": 3, "v": 2.5}
        ]));
        let (_, storage) = Synthesizer::default().synthesize(&sample, "").unwrap();
        assert_eq!(storage.tables[0].columns["v"], ColumnType::String);
        assert_eq!(storage.tables[0].columns["id"], ColumnType::Int);
    }

    #[test]
    fn test_int_and_float_widen_to_float() {
        let sample = sample(json!([{"id": "a", "n": 1}, {"id": "b", "n": 1.5}]));
        let (_, storage) = Synthesizer::default().synthesize(&sample, "").unwrap();
        assert_eq!(storage.tables[0].columns["n"], ColumnType::Float);
    }

    #[test]
    fn test_no_primary_key_rejected() {
        let sample = sample(json!([
            {"title": "A", "price": 1},
            {"title": "B", "price": 2}
        ]));
        let err = Synthesizer::default().synthesize(&sample, "x").unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::NoPrimaryKey);
    }

    #[test]
    fn test_key_must_be_present_in_every_record() {
        let sample = sample(json!([
            {"job_id": "1", "title": "A"},
            {"title": "B"}
        ]));
        let err = Synthesizer::default().synthesize(&sample, "x").unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::NoPrimaryKey);

        let sample = sample_with_null_key();
        let err = Synthesizer::default().synthesize(&sample, "x").unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::NoPrimaryKey);
    }

    fn sample_with_null_key() -> SampleDataset {
        sample(json!([{"id": null, "t": "a"}, {"id": 2, "t": "b"}]))
    }

    #[test]
    fn test_key_preference() {
        // `id` beats `*_id` when both are unique
        let s = sample(json!([
            {"id": 1, "post_id": 10, "author_url": "u1"},
            {"id": 2, "post_id": 11, "author_url": "u2"}
        ]));
        let (_, storage) = Synthesizer::default().synthesize(&s, "").unwrap();
        assert_eq!(storage.tables[0].primary_key, vec!["id".to_string()]);

        // a unique `*_url` beats a duplicated `id`
        let s = sample(json!([
            {"id": 1, "page_url": "a"},
            {"id": 1, "page_url": "b"}
        ]));
        let (_, storage) = Synthesizer::default().synthesize(&s, "").unwrap();
        assert_eq!(storage.tables[0].primary_key, vec!["page_url".to_string()]);
    }

    #[test]
    fn test_key_of_any_scalar_type() {
        let s = sample(json!([
            {"snapshot_id": "2024-05-01", "total": 3},
            {"snapshot_id": "2024-05-02", "total": 4}
        ]));
        let (extraction, storage) = Synthesizer::default().synthesize(&s, "").unwrap();
        assert_eq!(storage.tables[0].primary_key, vec!["snapshot_id".to_string()]);
        assert_eq!(storage.tables[0].columns["snapshot_id"], ColumnType::Timestamp);
        assert!(extraction.get("snapshot_id").unwrap().required);

        let s = sample(json!([{"is_id": true, "n": 1}, {"is_id": false, "n": 2}]));
        let (_, storage) = Synthesizer::default().synthesize(&s, "").unwrap();
        assert_eq!(storage.tables[0].primary_key, vec!["is_id".to_string()]);

        // nested values never qualify
        let s = sample(json!([{"id": [1], "n": 1}, {"id": [2], "n": 2}]));
        let err = Synthesizer::default().synthesize(&s, "").unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::NoPrimaryKey);
    }

    #[test]
    fn test_oversized_field_is_not_stored() {
        let big = "x".repeat(64);
        let s = sample(json!([{"id": 1, "body": big}, {"id": 2, "body": "short"}]));
        let synth = Synthesizer::new("pages", 32);
        let (extraction, storage) = synth.synthesize(&s, "").unwrap();

        assert!(!extraction.get("body").unwrap().storable);
        assert!(!storage.tables[0].columns.contains_key("body"));
        assert_eq!(storage.tables[0].table_name, "pages");
    }

    #[test]
    fn test_convergence_catches_divergence() {
        let s = sample(json!([{"id": 1, "name": "a"}]));
        let (extraction, mut storage) = Synthesizer::default().synthesize(&s, "").unwrap();
        verify_convergence(&extraction, &storage).unwrap();

        storage.tables[0]
            .columns
            .insert("ghost".into(), ColumnType::String);
        let err = verify_convergence(&extraction, &storage).unwrap_err();
        assert_eq!(err.kind, SchemaErrorKind::SchemaDivergence);

        storage.tables[0].columns.remove("ghost");
        storage.tables[0].columns.remove("name");
        assert!(verify_convergence(&extraction, &storage).is_err());

        storage.tables[0]
            .columns
            .insert("name".into(), ColumnType::Bool);
        assert!(verify_convergence(&extraction, &storage).is_err());
    }

    #[test]
    fn test_intent_never_adds_fields() {
        let s = sample(json!([{"id": 1}]));
        let (extraction, _) = Synthesizer::default()
            .synthesize(&s, "titles, prices and ratings")
            .unwrap();
        assert_eq!(extraction.len(), 1);
        assert!(extraction.get("id").unwrap().description.contains("ratings"));
    }

    #[test]
    fn test_sanitize_table_name() {
        assert_eq!(sanitize_table_name("Job Postings"), "job_postings");
        assert_eq!(sanitize_table_name("2024"), "t_2024");
        assert_eq!(sanitize_table_name("  "), "items");
    }
}
