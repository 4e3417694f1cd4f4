use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{ObjectRef, ProjectId, Reference, TenantId};
use crate::error::Error;

pub const DEFAULT_VARIANT: &str = "default";
pub const DEFAULT_NAMESPACE: &str = "--root--";
pub const DEFAULT_ADMIN_VIEW_LABEL: &str = "_default-admin-view";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: TenantId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: ProjectId,
    pub tenant_id: TenantId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub catalog_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    pub project_id: ProjectId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Catalog {
    /// A catalog ready to be passed to `create_catalog`; ids and timestamps are assigned there.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            catalog_id: Uuid::nil(),
            name: name.into(),
            description: None,
            info: None,
            project_id: ProjectId::new(""),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    pub catalog_id: Uuid,
    pub resource_directory_id: Uuid,
    pub skillset_directory_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Variant {
    pub fn new(catalog_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            variant_id: Uuid::nil(),
            name: name.into(),
            description: None,
            info: None,
            catalog_id,
            resource_directory_id: Uuid::nil(),
            skillset_directory_id: Uuid::nil(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn directory_id(&self, kind: ObjectKind) -> Uuid {
        match kind {
            ObjectKind::Resource => self.resource_directory_id,
            ObjectKind::SkillSet => self.skillset_directory_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSummary {
    pub variant_id: Uuid,
    pub name: String,
    pub resource_directory_id: Uuid,
    pub skillset_directory_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub variant_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Namespace {
    pub fn new(variant_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            variant_id,
            description: None,
            info: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct View {
    pub view_id: Uuid,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    pub catalog_id: Uuid,
    pub definition: crate::policy::ViewDefinition,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl View {
    pub fn new(
        catalog_id: Uuid,
        label: impl Into<String>,
        definition: crate::policy::ViewDefinition,
    ) -> Self {
        let now = Utc::now();
        Self {
            view_id: Uuid::nil(),
            label: label.into(),
            description: None,
            info: None,
            catalog_id,
            definition,
            created_by: String::new(),
            updated_by: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewToken {
    pub token_id: Uuid,
    pub view_id: Uuid,
    pub expire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ViewToken {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }
}

/// Session lifecycle. Terminal statuses share one rank so a session can be
/// reclassified after it ends, but never moved back to an earlier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Running,
    Completed,
    Failed,
    Expired,
}

impl SessionStatus {
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            SessionStatus::Created => 0,
            SessionStatus::Running => 1,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Expired => 2,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    #[must_use]
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        next.rank() >= self.rank()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(SessionStatus::Created),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "expired" => Ok(SessionStatus::Expired),
            other => Err(Error::invalid_input(format!("unknown session status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub skillset: String,
    pub skill: String,
    pub view_id: Uuid,
    pub tangent_id: Uuid,
    pub status_summary: SessionStatus,
    pub status: Value,
    pub info: Value,
    pub user_id: String,
    pub catalog_id: Uuid,
    pub variant_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKey {
    pub key_id: Uuid,
    pub public_key: Vec<u8>,
    #[serde(skip)]
    pub private_key: Vec<u8>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration payload a remote runtime publishes about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TangentInfo {
    pub id: Uuid,
    #[serde(default)]
    pub created_by: String,
    pub url: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub public_key_access_key: Vec<u8>,
    #[serde(default)]
    pub public_key_log_signing_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tangent {
    pub id: Uuid,
    pub info: TangentInfo,
    /// Ed25519 key used to verify signed requests from this runtime.
    pub public_key: Vec<u8>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tangent {
    #[must_use]
    pub fn from_info(info: TangentInfo) -> Self {
        let now = Utc::now();
        Self {
            id: info.id,
            public_key: info.public_key_access_key.clone(),
            info,
            status: "active".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The two kinds of objects a variant indexes by path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Resource,
    SkillSet,
}

impl ObjectKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Resource => "resource",
            ObjectKind::SkillSet => "skillset",
        }
    }

    /// Directory table holding this kind's path index.
    #[must_use]
    pub(crate) fn directory_table(self) -> &'static str {
        match self {
            ObjectKind::Resource => "resource_directory",
            ObjectKind::SkillSet => "skillset_directory",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resource" => Ok(ObjectKind::Resource),
            "skillset" => Ok(ObjectKind::SkillSet),
            other => Err(Error::invalid_input(format!("unknown object kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogObject {
    pub hash: String,
    pub kind: ObjectKind,
    pub version: String,
    /// Uncompressed body.
    pub data: Vec<u8>,
}

impl CatalogObject {
    pub fn new(hash: impl Into<String>, kind: ObjectKind, data: Vec<u8>) -> Self {
        Self {
            hash: hash.into(),
            kind,
            version: "v1".to_string(),
            data,
        }
    }

    /// Prefix used as the short lookup key; callers validate the hash length first.
    #[must_use]
    pub fn hash_id(&self) -> &str {
        &self.hash[..HASH_ID_LEN.min(self.hash.len())]
    }
}

pub const HASH_ID_LEN: usize = 16;

/// A path entry of a variant's Resource or SkillSet directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub path: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl DirectoryEntry {
    pub fn new(path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            references: Vec::new(),
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_references<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = names.into_iter().map(|name| Reference { name: name.into() }).collect();
        self
    }

    /// Builds the entry for `path` from the directory's pointer.
    pub fn from_ref(path: impl Into<String>, obj_ref: ObjectRef) -> Self {
        Self {
            path: path.into(),
            hash: obj_ref.hash,
            references: obj_ref.references,
            metadata: obj_ref.metadata,
        }
    }

    #[must_use]
    pub fn to_ref(&self) -> ObjectRef {
        ObjectRef {
            hash: self.hash.clone(),
            references: self.references.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_is_monotonic() {
        assert!(SessionStatus::Created.can_transition_to(SessionStatus::Running));
        assert!(SessionStatus::Running.can_transition_to(SessionStatus::Completed));
        assert!(SessionStatus::Completed.can_transition_to(SessionStatus::Failed));
        assert!(!SessionStatus::Completed.can_transition_to(SessionStatus::Running));
        assert!(!SessionStatus::Running.can_transition_to(SessionStatus::Created));
    }

    #[test]
    fn test_session_status_round_trips_through_str() {
        for status in [
            SessionStatus::Created,
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_tangent_info_uses_camel_case() {
        let info: TangentInfo = serde_json::from_value(serde_json::json!({
            "id": "7d3e5a10-0000-4000-8000-000000000001",
            "url": "http://runtime.local:8468",
            "publicKeyAccessKey": [1, 2, 3],
            "capabilities": ["command-runner"]
        }))
        .unwrap();
        assert_eq!(info.public_key_access_key, vec![1, 2, 3]);
        assert_eq!(info.capabilities, vec!["command-runner".to_string()]);
        assert_eq!(Tangent::from_info(info).public_key, vec![1, 2, 3]);
    }
}
