#![allow(dead_code)]

use tempfile::TempDir;

use skillvault::config::DbConfig;
use skillvault::store::ScopedPool;
use skillvault::types::{Catalog, ProjectId, RequestContext, TenantId, UserContext, Variant};

pub struct TestStore {
    pub temp_dir: TempDir,
    pub pool: ScopedPool,
}

impl TestStore {
    pub fn open() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut DbConfig)) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut config = DbConfig::with_path(temp_dir.path().join("skillvault.db"));
        adjust(&mut config);
        let pool = ScopedPool::open(config).expect("open pool");
        Self { temp_dir, pool }
    }

    /// Creates the tenant and project named by `ctx`.
    pub fn seed(&self, ctx: &RequestContext) {
        let conn = self.pool.tenant_conn(ctx).expect("checkout");
        conn.metadata()
            .create_project_and_tenant(ctx)
            .expect("create tenant and project");
        conn.close();
    }

    /// Seeds the tenant, then creates `catalog` with a `variant` under it.
    pub fn catalog_with_variant(&self, ctx: &RequestContext, catalog: &str, variant: &str) -> Variant {
        self.seed(ctx);
        let conn = self.pool.tenant_conn(ctx).expect("checkout");
        let meta = conn.metadata();
        let mut cat = Catalog::new(catalog);
        meta.create_catalog(ctx, &mut cat).expect("create catalog");
        let mut var = Variant::new(cat.catalog_id, variant);
        meta.create_variant(ctx, &mut var).expect("create variant");
        conn.close();
        var
    }
}

pub fn ctx(tenant: &str, project: &str) -> RequestContext {
    RequestContext::new()
        .with_tenant(TenantId::new(tenant))
        .with_project(ProjectId::new(project))
        .with_user(UserContext::user("alice"))
}

/// A 128-character hex string standing in for a content hash.
pub fn hash_of(seed: &str) -> String {
    skillvault::store::content_hash(&serde_json::json!({ "seed": seed })).expect("hash")
}
