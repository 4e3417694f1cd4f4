use chrono::Utc;
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};
use tracing::info;
use uuid::Uuid;

use super::variant::insert_variant;
use super::view::insert_view;
use super::{Lookup, MetadataManager, new_id};
use crate::error::{Error, Result};
use crate::policy::ViewDefinition;
use crate::store::{
    datetime_column, format_datetime, map_constraint, opt_json_column, opt_json_text, uuid_column,
};
use crate::types::{
    Catalog, DEFAULT_ADMIN_VIEW_LABEL, DEFAULT_VARIANT, ProjectId, RequestContext, Variant, View,
};

const CATALOG_COLUMNS: &str =
    "catalog_id, name, description, info, project_id, created_at, updated_at";

fn catalog_from_row(row: &Row<'_>) -> rusqlite::Result<Catalog> {
    Ok(Catalog {
        catalog_id: uuid_column(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        info: opt_json_column(row, 3)?,
        project_id: ProjectId::new(row.get::<_, String>(4)?),
        created_at: datetime_column(row, 5)?,
        updated_at: datetime_column(row, 6)?,
    })
}

impl MetadataManager<'_> {
    /// Creates a catalog together with its default variant (and that variant's root
    /// namespace and empty directories) and a default admin view, all in one
    /// transaction. Fills in the assigned ids.
    pub fn create_catalog(&self, ctx: &RequestContext, catalog: &mut Catalog) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        let project = ctx.project_id()?.clone();
        let principal = format!("user/{}", ctx.user()?.user_id);

        let now = Utc::now();
        catalog.catalog_id = new_id(catalog.catalog_id);
        catalog.project_id = project.clone();
        catalog.created_at = now;
        catalog.updated_at = now;
        let info = opt_json_text(catalog.info.as_ref())?;

        let mut variant = Variant::new(catalog.catalog_id, DEFAULT_VARIANT);
        variant.description = Some("default variant".to_string());

        let mut view = View::new(
            catalog.catalog_id,
            DEFAULT_ADMIN_VIEW_LABEL,
            ViewDefinition::catalog_admin(&catalog.name),
        );
        view.description = Some("default admin view".to_string());
        view.created_by.clone_from(&principal);
        view.updated_by = principal;

        self.conn.transaction(TransactionBehavior::Immediate, |tx| {
            tx.execute(
                "INSERT INTO catalogs
                     (catalog_id, name, description, info, project_id, tenant_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    catalog.catalog_id.to_string(),
                    catalog.name,
                    catalog.description,
                    info,
                    project.as_str(),
                    tenant.as_str(),
                    format_datetime(&now),
                ],
            )
            .map_err(|e| map_constraint(e, &format!("catalog {}", catalog.name)))?;

            insert_variant(tx, &tenant, &mut variant, &now)?;
            insert_view(tx, &tenant, &mut view, &now)?;
            Ok(())
        })?;

        info!(tenant = %tenant, catalog = %catalog.name, catalog_id = %catalog.catalog_id, "Created catalog");
        Ok(())
    }

    /// Fails with `InvalidCatalog` when the project has no catalog of that name.
    pub fn get_catalog_id_by_name(&self, ctx: &RequestContext, name: &str) -> Result<Uuid> {
        let tenant = self.conn.tenant(ctx)?;
        let project = ctx.project_id()?;
        let id = self.conn.run(|c| {
            c.query_row(
                "SELECT catalog_id FROM catalogs
                 WHERE tenant_id = ?1 AND project_id = ?2 AND name = ?3",
                params![tenant.as_str(), project.as_str(), name],
                |row| uuid_column(row, 0),
            )
            .optional()
            .map_err(Error::from)
        })?;
        id.ok_or(Error::InvalidCatalog)
    }

    pub fn get_catalog_by_id(&self, ctx: &RequestContext, catalog_id: Uuid) -> Result<Catalog> {
        let tenant = self.conn.tenant(ctx)?;
        let sql = format!("SELECT {CATALOG_COLUMNS} FROM catalogs WHERE tenant_id = ?1 AND catalog_id = ?2");
        let row = self.conn.run(|c| {
            c.query_row(&sql, params![tenant.as_str(), catalog_id.to_string()], catalog_from_row)
                .optional()
                .map_err(Error::from)
        })?;
        row.ok_or_else(|| Error::not_found(format!("catalog {catalog_id}")))
    }

    pub fn get_catalog_by_name(&self, ctx: &RequestContext, name: &str) -> Result<Catalog> {
        let tenant = self.conn.tenant(ctx)?;
        let project = ctx.project_id()?;
        let sql = format!(
            "SELECT {CATALOG_COLUMNS} FROM catalogs
             WHERE tenant_id = ?1 AND project_id = ?2 AND name = ?3"
        );
        let row = self.conn.run(|c| {
            c.query_row(&sql, params![tenant.as_str(), project.as_str(), name], catalog_from_row)
                .optional()
                .map_err(Error::from)
        })?;
        row.ok_or_else(|| Error::not_found(format!("catalog {name}")))
    }

    /// Updates description and info. The catalog is found by id, or by name when
    /// the id is nil.
    pub fn update_catalog(&self, ctx: &RequestContext, catalog: &Catalog) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        let project = ctx.project_id()?;
        let lookup = Lookup::resolve(Some(catalog.catalog_id), &catalog.name)?;
        let info = opt_json_text(catalog.info.as_ref())?;
        let now = format_datetime(&Utc::now());

        let (column, key) = match lookup {
            Lookup::Id(id) => ("catalog_id", id.to_string()),
            Lookup::Name(name) => ("name", name.to_string()),
        };
        let sql = format!(
            "UPDATE catalogs SET description = ?1, info = ?2, updated_at = ?3
             WHERE tenant_id = ?4 AND project_id = ?5 AND {column} = ?6"
        );

        let rows = self.conn.run(|c| {
            c.execute(
                &sql,
                params![catalog.description, info, now, tenant.as_str(), project.as_str(), key],
            )
            .map_err(|e| map_constraint(e, "catalog"))
        })?;
        if rows == 0 {
            return Err(Error::not_found(format!("catalog {key}")));
        }
        Ok(())
    }

    /// Deletes a catalog and everything under it.
    pub fn delete_catalog(&self, ctx: &RequestContext, catalog: Lookup<'_>) -> Result<bool> {
        let tenant = self.conn.tenant(ctx)?;
        let project = ctx.project_id()?;
        let (column, key) = match catalog {
            Lookup::Id(id) => ("catalog_id", id.to_string()),
            Lookup::Name(name) => ("name", name.to_string()),
        };
        let sql = format!(
            "DELETE FROM catalogs WHERE tenant_id = ?1 AND project_id = ?2 AND {column} = ?3"
        );

        let rows = self.conn.run(|c| {
            c.execute(&sql, params![tenant.as_str(), project.as_str(), key])
                .map_err(Error::from)
        })?;
        if rows > 0 {
            info!(tenant = %tenant, catalog = %key, "Deleted catalog");
        }
        Ok(rows > 0)
    }

    pub fn list_catalogs(&self, ctx: &RequestContext) -> Result<Vec<Catalog>> {
        let tenant = self.conn.tenant(ctx)?;
        let project = ctx.project_id()?;
        let sql = format!(
            "SELECT {CATALOG_COLUMNS} FROM catalogs
             WHERE tenant_id = ?1 AND project_id = ?2 ORDER BY name"
        );
        self.conn.run(|c| {
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(params![tenant.as_str(), project.as_str()], catalog_from_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(Error::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use crate::error::Error;
    use crate::store::metadata::Lookup;
    use crate::store::metadata::testing::seeded;
    use crate::types::{Catalog, DEFAULT_ADMIN_VIEW_LABEL, DEFAULT_NAMESPACE, DEFAULT_VARIANT, ObjectKind};

    #[test]
    fn test_create_catalog_seeds_variant_namespace_and_admin_view() {
        let temp = TempDir::new().unwrap();
        let (pool, ctx) = seeded(&temp, "T1", "P1");
        let conn = pool.tenant_conn(&ctx).unwrap();
        let meta = conn.metadata();

        let mut catalog = Catalog::new("acme");
        catalog.info = Some(json!({"owner": "platform"}));
        meta.create_catalog(&ctx, &mut catalog).unwrap();
        assert!(!catalog.catalog_id.is_nil());

        let variants = meta.list_variants_by_catalog(&ctx, catalog.catalog_id).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].name, DEFAULT_VARIANT);

        let namespaces = meta.list_namespaces_by_variant(&ctx, variants[0].variant_id).unwrap();
        assert_eq!(namespaces.len(), 1);
        assert_eq!(namespaces[0].name, DEFAULT_NAMESPACE);

        let dir = conn
            .objects()
            .get_schema_directory(&ctx, ObjectKind::SkillSet, variants[0].skillset_directory_id)
            .unwrap();
        assert!(dir.directory.is_empty());

        let view = meta
            .get_view_by_label(&ctx, DEFAULT_ADMIN_VIEW_LABEL, catalog.catalog_id)
            .unwrap();
        assert_eq!(view.definition.scope.catalog, "acme");
        assert_eq!(view.created_by, "user/alice");

        let stored = meta.get_catalog_by_name(&ctx, "acme").unwrap();
        assert_eq!(stored.info, Some(json!({"owner": "platform"})));
    }

    #[test]
    fn test_create_catalog_rejects_duplicates_and_bad_names() {
        let temp = TempDir::new().unwrap();
        let (pool, ctx) = seeded(&temp, "T1", "P1");
        let conn = pool.tenant_conn(&ctx).unwrap();
        let meta = conn.metadata();

        meta.create_catalog(&ctx, &mut Catalog::new("acme")).unwrap();
        assert!(matches!(
            meta.create_catalog(&ctx, &mut Catalog::new("acme")),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            meta.create_catalog(&ctx, &mut Catalog::new("not valid!")),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(meta.list_catalogs(&ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_create_catalog_requires_project_and_user() {
        let temp = TempDir::new().unwrap();
        let (pool, ctx) = seeded(&temp, "T1", "P1");
        let conn = pool.tenant_conn(&ctx).unwrap();

        let no_user = crate::types::RequestContext::new()
            .with_tenant(ctx.tenant_id().unwrap().clone())
            .with_project(ctx.project_id().unwrap().clone());
        assert!(matches!(
            conn.metadata().create_catalog(&no_user, &mut Catalog::new("acme")),
            Err(Error::MissingUserContext)
        ));

        let no_project = crate::types::RequestContext::new()
            .with_tenant(ctx.tenant_id().unwrap().clone());
        assert!(matches!(
            conn.metadata().create_catalog(&no_project, &mut Catalog::new("acme")),
            Err(Error::MissingProjectId)
        ));
    }

    #[test]
    fn test_update_and_delete_catalog() {
        let temp = TempDir::new().unwrap();
        let (pool, ctx) = seeded(&temp, "T1", "P1");
        let conn = pool.tenant_conn(&ctx).unwrap();
        let meta = conn.metadata();

        let mut catalog = Catalog::new("acme");
        meta.create_catalog(&ctx, &mut catalog).unwrap();
        assert_eq!(meta.get_catalog_id_by_name(&ctx, "acme").unwrap(), catalog.catalog_id);
        assert!(matches!(
            meta.get_catalog_id_by_name(&ctx, "missing"),
            Err(Error::InvalidCatalog)
        ));

        let mut by_name = Catalog::new("acme");
        by_name.description = Some("renamed".to_string());
        meta.update_catalog(&ctx, &by_name).unwrap();
        assert_eq!(
            meta.get_catalog_by_id(&ctx, catalog.catalog_id).unwrap().description.as_deref(),
            Some("renamed")
        );

        let mut neither = Catalog::new("");
        neither.description = Some("x".to_string());
        assert!(matches!(meta.update_catalog(&ctx, &neither), Err(Error::InvalidInput(_))));

        assert!(meta.delete_catalog(&ctx, Lookup::Name("acme")).unwrap());
        assert!(!meta.delete_catalog(&ctx, Lookup::Id(catalog.catalog_id)).unwrap());
        assert!(meta.get_catalog_by_id(&ctx, catalog.catalog_id).unwrap_err().is_not_found());
        assert!(meta.list_variants_by_catalog(&ctx, catalog.catalog_id).unwrap().is_empty());
    }
}
