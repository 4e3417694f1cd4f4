use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;
use uuid::Uuid;

use super::MetadataManager;
use crate::error::{Error, Result};
use crate::policy::validate_view_definition;
use crate::store::{
    datetime_column, format_datetime, json_column, map_constraint, opt_json_column,
    opt_json_text, uuid_column,
};
use crate::types::{RequestContext, TenantId, View};

const VIEW_COLUMNS: &str = "view_id, label, description, info, rules, catalog_id, \
     created_by, updated_by, created_at, updated_at";

fn view_from_row(row: &Row<'_>) -> rusqlite::Result<View> {
    Ok(View {
        view_id: uuid_column(row, 0)?,
        label: row.get(1)?,
        description: row.get(2)?,
        info: opt_json_column(row, 3)?,
        definition: json_column(row, 4)?,
        catalog_id: uuid_column(row, 5)?,
        created_by: row.get(6)?,
        updated_by: row.get(7)?,
        created_at: datetime_column(row, 8)?,
        updated_at: datetime_column(row, 9)?,
    })
}

/// Inserts a view under a fresh id. Runs inside the caller's transaction when
/// one is open.
pub(super) fn insert_view(
    conn: &Connection,
    tenant: &TenantId,
    view: &mut View,
    now: &DateTime<Utc>,
) -> Result<()> {
    view.view_id = Uuid::new_v4();
    view.created_at = *now;
    view.updated_at = *now;

    conn.execute(
        "INSERT INTO views
             (view_id, label, description, info, rules, catalog_id, tenant_id,
              created_by, updated_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            view.view_id.to_string(),
            view.label,
            view.description,
            opt_json_text(view.info.as_ref())?,
            serde_json::to_string(&view.definition)?,
            view.catalog_id.to_string(),
            tenant.as_str(),
            view.created_by,
            view.updated_by,
            format_datetime(now),
        ],
    )
    .map_err(|e| map_constraint(e, &format!("view {}", view.label)))?;
    Ok(())
}

fn principal(ctx: &RequestContext) -> Result<String> {
    Ok(format!("user/{}", ctx.user()?.user_id))
}

impl MetadataManager<'_> {
    /// Validates and stores a view; the author is taken from the request context.
    pub fn create_view(&self, ctx: &RequestContext, view: &mut View) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        let author = principal(ctx)?;
        validate_view_definition(&view.definition)?;

        view.created_by.clone_from(&author);
        view.updated_by = author;
        let now = Utc::now();
        self.conn.run(|c| insert_view(c, &tenant, view, &now))?;
        info!(tenant = %tenant, view = %view.label, view_id = %view.view_id, "Created view");
        Ok(())
    }

    pub fn get_view(&self, ctx: &RequestContext, view_id: Uuid) -> Result<View> {
        let tenant = self.conn.tenant(ctx)?;
        let sql = format!("SELECT {VIEW_COLUMNS} FROM views WHERE tenant_id = ?1 AND view_id = ?2");
        let row = self.conn.run(|c| {
            c.query_row(&sql, params![tenant.as_str(), view_id.to_string()], view_from_row)
                .optional()
                .map_err(Error::from)
        })?;
        row.ok_or_else(|| Error::not_found(format!("view {view_id}")))
    }

    pub fn get_view_by_label(
        &self,
        ctx: &RequestContext,
        label: &str,
        catalog_id: Uuid,
    ) -> Result<View> {
        let tenant = self.conn.tenant(ctx)?;
        let sql = format!(
            "SELECT {VIEW_COLUMNS} FROM views WHERE tenant_id = ?1 AND catalog_id = ?2 AND label = ?3"
        );
        let row = self.conn.run(|c| {
            c.query_row(
                &sql,
                params![tenant.as_str(), catalog_id.to_string(), label],
                view_from_row,
            )
            .optional()
            .map_err(Error::from)
        })?;
        row.ok_or_else(|| Error::not_found(format!("view {label}")))
    }

    /// Replaces description, info and definition. The view is found by id, or by
    /// label within its catalog when the id is nil.
    pub fn update_view(&self, ctx: &RequestContext, view: &View) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        let author = principal(ctx)?;
        validate_view_definition(&view.definition)?;

        let (filter, key, catalog) = if !view.view_id.is_nil() {
            ("view_id = ?6", view.view_id.to_string(), None)
        } else if !view.label.is_empty() && !view.catalog_id.is_nil() {
            ("label = ?6 AND catalog_id = ?7", view.label.clone(), Some(view.catalog_id.to_string()))
        } else {
            return Err(Error::invalid_input(
                "either a view id or a label and catalog must be provided",
            ));
        };
        let sql = format!(
            "UPDATE views SET description = ?1, info = ?2, rules = ?3, updated_by = ?4, updated_at = ?5
             WHERE tenant_id = ?8 AND {filter}"
        );
        let info = opt_json_text(view.info.as_ref())?;
        let rules = serde_json::to_string(&view.definition)?;

        let rows = self.conn.run(|c| {
            c.execute(
                &sql,
                params![
                    view.description,
                    info,
                    rules,
                    author,
                    format_datetime(&Utc::now()),
                    key,
                    catalog,
                    tenant.as_str(),
                ],
            )
            .map_err(|e| map_constraint(e, &format!("view {key}")))
        })?;
        if rows == 0 {
            return Err(Error::not_found(format!("view {key}")));
        }
        Ok(())
    }

    /// Deletes a view; its tokens go with it.
    pub fn delete_view(&self, ctx: &RequestContext, view_id: Uuid) -> Result<bool> {
        let tenant = self.conn.tenant(ctx)?;
        let rows = self.conn.run(|c| {
            c.execute(
                "DELETE FROM views WHERE tenant_id = ?1 AND view_id = ?2",
                params![tenant.as_str(), view_id.to_string()],
            )
            .map_err(Error::from)
        })?;
        Ok(rows > 0)
    }

    pub fn delete_view_by_label(
        &self,
        ctx: &RequestContext,
        label: &str,
        catalog_id: Uuid,
    ) -> Result<bool> {
        let tenant = self.conn.tenant(ctx)?;
        if label.is_empty() {
            return Err(Error::invalid_input("label cannot be empty"));
        }
        if catalog_id.is_nil() {
            return Err(Error::invalid_input("catalog id cannot be empty"));
        }
        let rows = self.conn.run(|c| {
            c.execute(
                "DELETE FROM views WHERE tenant_id = ?1 AND catalog_id = ?2 AND label = ?3",
                params![tenant.as_str(), catalog_id.to_string(), label],
            )
            .map_err(Error::from)
        })?;
        Ok(rows > 0)
    }

    pub fn list_views_by_catalog(&self, ctx: &RequestContext, catalog_id: Uuid) -> Result<Vec<View>> {
        let tenant = self.conn.tenant(ctx)?;
        let sql = format!(
            "SELECT {VIEW_COLUMNS} FROM views WHERE tenant_id = ?1 AND catalog_id = ?2 ORDER BY label"
        );
        self.conn.run(|c| {
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(params![tenant.as_str(), catalog_id.to_string()], view_from_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(Error::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::error::Error;
    use crate::policy::{Action, Rule, Scope, ViewDefinition};
    use crate::store::metadata::testing::seeded;
    use crate::types::{Catalog, DEFAULT_ADMIN_VIEW_LABEL, View};

    fn reader(catalog: &str) -> ViewDefinition {
        ViewDefinition::new(
            Scope::catalog(catalog).with_variant("dev"),
            vec![Rule::allow([Action::SKILLSET_READ], ["res://skillsets/tools/*"])],
        )
    }

    #[test]
    fn test_view_crud() {
        let temp = TempDir::new().unwrap();
        let (pool, ctx) = seeded(&temp, "T1", "P1");
        let conn = pool.tenant_conn(&ctx).unwrap();
        let meta = conn.metadata();

        let mut catalog = Catalog::new("acme");
        meta.create_catalog(&ctx, &mut catalog).unwrap();

        let mut view = View::new(catalog.catalog_id, "dev-readers", reader("acme"));
        meta.create_view(&ctx, &mut view).unwrap();
        assert_eq!(meta.get_view(&ctx, view.view_id).unwrap().definition, reader("acme"));
        assert!(matches!(
            meta.create_view(&ctx, &mut View::new(catalog.catalog_id, "dev-readers", reader("acme"))),
            Err(Error::AlreadyExists(_))
        ));

        let mut by_label = View::new(catalog.catalog_id, "dev-readers", ViewDefinition::catalog_admin("acme"));
        by_label.description = Some("promoted".to_string());
        meta.update_view(&ctx, &by_label).unwrap();
        let stored = meta.get_view_by_label(&ctx, "dev-readers", catalog.catalog_id).unwrap();
        assert_eq!(stored.definition, ViewDefinition::catalog_admin("acme"));
        assert_eq!(stored.updated_by, "user/alice");

        let labels: Vec<String> = meta
            .list_views_by_catalog(&ctx, catalog.catalog_id)
            .unwrap()
            .into_iter()
            .map(|v| v.label)
            .collect();
        assert_eq!(labels, vec![DEFAULT_ADMIN_VIEW_LABEL.to_string(), "dev-readers".to_string()]);

        assert!(meta.delete_view_by_label(&ctx, "dev-readers", catalog.catalog_id).unwrap());
        assert!(!meta.delete_view(&ctx, view.view_id).unwrap());
        assert!(meta.get_view(&ctx, view.view_id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_create_view_rejects_invalid_definitions() {
        let temp = TempDir::new().unwrap();
        let (pool, ctx) = seeded(&temp, "T1", "P1");
        let conn = pool.tenant_conn(&ctx).unwrap();
        let meta = conn.metadata();

        let mut catalog = Catalog::new("acme");
        meta.create_catalog(&ctx, &mut catalog).unwrap();

        let bad_action = ViewDefinition::new(
            Scope::catalog("acme"),
            vec![Rule::allow(["system.catalog.destroy"], ["res://skillsets/x"])],
        );
        assert!(matches!(
            meta.create_view(&ctx, &mut View::new(catalog.catalog_id, "bad", bad_action)),
            Err(Error::InvalidInput(_))
        ));

        let bad_target = ViewDefinition::new(
            Scope::catalog("acme"),
            vec![Rule::allow([Action::SKILLSET_READ], ["res://skillsets/*/x"])],
        );
        assert!(matches!(
            meta.create_view(&ctx, &mut View::new(catalog.catalog_id, "bad", bad_target)),
            Err(Error::InvalidInput(_))
        ));
    }
}
