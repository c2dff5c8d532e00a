//! Extraction and storage schema types.
//!
//! Both schemas are projections of one field set: the extraction schema
//! describes every field the source yields, the storage schema types the
//! storable subset into tables keyed for idempotent re-ingestion.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Field type as seen by the extraction side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
        }
    }

    /// JSON Schema fragment for this type (dates are formatted strings).
    fn json_schema(&self) -> Value {
        match self {
            FieldType::Date => json!({"type": "string", "format": "date-time"}),
            other => json!({"type": other.as_str()}),
        }
    }
}

/// One field of the extraction schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub description: String,
    pub required: bool,
    /// False for fields extracted but never stored (oversized blobs).
    #[serde(default = "default_storable", skip_serializing_if = "is_true")]
    pub storable: bool,
}

fn default_storable() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

/// Field-level descriptor used to drive structured extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionSchema {
    pub fields: BTreeMap<String, FieldSpec>,
}

impl ExtractionSchema {
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Names of fields that must appear in storage.
    pub fn storable_fields(&self) -> BTreeSet<&str> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.storable)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Render as a JSON Schema object, the shape the extraction service
    /// expects for structured extraction.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for (name, spec) in &self.fields {
            let mut prop = spec.field_type.json_schema();
            if let Value::Object(ref mut obj) = prop {
                obj.insert("description".into(), Value::String(spec.description.clone()));
            }
            properties.insert(name.clone(), prop);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Logical storage column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Int => "INT",
            ColumnType::Float => "FLOAT",
            ColumnType::Bool => "BOOL",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    /// Extraction-side type this column projects from.
    pub fn field_type(&self) -> FieldType {
        match self {
            ColumnType::String => FieldType::String,
            ColumnType::Int | ColumnType::Float => FieldType::Number,
            ColumnType::Bool => FieldType::Boolean,
            ColumnType::Timestamp => FieldType::Date,
        }
    }

    pub fn is_compatible_with(&self, field_type: FieldType) -> bool {
        self.field_type() == field_type
    }

    /// Type name understood by the connector-hosting SDK.
    pub fn connector_type(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Int => "LONG",
            ColumnType::Float => "DOUBLE",
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Timestamp => "UTC_DATETIME",
        }
    }
}

/// One destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub primary_key: Vec<String>,
    pub columns: BTreeMap<String, ColumnType>,
}

/// Typed table definitions used to persist extracted records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageSchema {
    pub tables: Vec<TableSchema>,
}

impl StorageSchema {
    pub fn single(table: TableSchema) -> Self {
        Self {
            tables: vec![table],
        }
    }

    /// Render in the connector SDK's schema shape:
    /// `[{"table": .., "primary_key": [..], "columns": {name: TYPE}}]`.
    pub fn to_connector_json(&self) -> Value {
        Value::Array(
            self.tables
                .iter()
                .map(|t| {
                    let columns: serde_json::Map<String, Value> = t
                        .columns
                        .iter()
                        .map(|(name, ty)| (name.clone(), Value::String(ty.connector_type().into())))
                        .collect();
                    json!({
                        "table": t.table_name,
                        "primary_key": t.primary_key,
                        "columns": columns,
                    })
                })
                .collect(),
        )
    }
}
