use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::ObjectKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
}

/// Pointer from a directory path to a stored object. Lives only inside a directory document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ObjectRef {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn references(&self, name: &str) -> bool {
        self.references.iter().any(|r| r.name == name)
    }
}

/// Path to object map, ordered so serialization is stable.
pub type Directory = BTreeMap<String, ObjectRef>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDirectory {
    pub directory_id: Uuid,
    pub variant_id: Uuid,
    pub kind: ObjectKind,
    pub directory: Directory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
