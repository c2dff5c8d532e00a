//! Data models for pipewright.

mod artifact;
mod credentials;
mod deployment;
mod request;
mod schema;

pub use artifact::{ConnectorConfig, DependencyManifest, GeneratedArtifact};
pub use credentials::{Credentials, Secret};
pub use deployment::{DeploymentRecord, DeploymentStatus};
pub use request::{GenerationRequest, RequestError};
pub(crate) use request::is_safe_identifier;
pub use schema::{
    ColumnType, ExtractionSchema, FieldSpec, FieldType, StorageSchema, TableSchema,
};

/// One extracted record: a semi-structured key/value map.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Ordered sample records returned by the extraction probe.
///
/// Transient: drives schema synthesis and is never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleDataset {
    records: Vec<Record>,
}

impl SampleDataset {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<Record>> for SampleDataset {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}
