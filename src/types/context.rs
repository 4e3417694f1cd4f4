use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    User,
    Session,
}

/// The authenticated principal behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub subject_type: SubjectType,
}

impl UserContext {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            subject_type: SubjectType::User,
        }
    }
}

/// The catalog, variant and namespace a request is routed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<Uuid>,
    pub catalog: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<Uuid>,
    pub variant: String,
    pub namespace: String,
}

impl CatalogContext {
    pub fn new(catalog: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

/// Immutable request-scoped context threaded through every storage and policy call.
///
/// Builders consume and return the context, so a handler that needs a narrower
/// context clones and rebinds instead of mutating shared state.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    tenant_id: Option<TenantId>,
    project_id: Option<ProjectId>,
    user: Option<UserContext>,
    catalog: CatalogContext,
    cancel: CancellationToken,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    #[must_use]
    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = Some(user);
        self
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: CatalogContext) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn tenant_id(&self) -> Result<&TenantId> {
        self.tenant_id
            .as_ref()
            .filter(|t| !t.as_str().is_empty())
            .ok_or(Error::MissingTenantId)
    }

    pub fn project_id(&self) -> Result<&ProjectId> {
        self.project_id
            .as_ref()
            .filter(|p| !p.as_str().is_empty())
            .ok_or(Error::MissingProjectId)
    }

    pub fn user(&self) -> Result<&UserContext> {
        self.user.as_ref().ok_or(Error::MissingUserContext)
    }

    #[must_use]
    pub fn has_tenant(&self) -> bool {
        self.tenant_id().is_ok()
    }

    #[must_use]
    pub fn has_project(&self) -> bool {
        self.project_id().is_ok()
    }

    #[must_use]
    pub fn catalog(&self) -> &CatalogContext {
        &self.catalog
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_identity_is_distinct() {
        let ctx = RequestContext::new();
        assert!(matches!(ctx.tenant_id(), Err(Error::MissingTenantId)));
        assert!(matches!(ctx.project_id(), Err(Error::MissingProjectId)));
        assert!(matches!(ctx.user(), Err(Error::MissingUserContext)));
    }

    #[test]
    fn test_empty_tenant_counts_as_missing() {
        let ctx = RequestContext::new().with_tenant(TenantId::new(""));
        assert!(matches!(ctx.tenant_id(), Err(Error::MissingTenantId)));
    }

    #[test]
    fn test_builders_do_not_affect_clones() {
        let base = RequestContext::new().with_tenant(TenantId::new("T1"));
        let scoped = base
            .clone()
            .with_catalog(CatalogContext::new("acme").with_variant("prod"));
        assert_eq!(base.catalog().catalog, "");
        assert_eq!(scoped.catalog().variant, "prod");
        assert_eq!(scoped.tenant_id().unwrap().as_str(), "T1");
    }
}
