use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::info;
use uuid::Uuid;

use super::MetadataManager;
use crate::error::{Error, Result};
use crate::store::directory::purge_namespace;
use crate::store::{
    datetime_column, format_datetime, map_constraint, opt_json_column, opt_json_text, uuid_column,
};
use crate::types::{DEFAULT_NAMESPACE, Namespace, ObjectKind, RequestContext, TenantId};

fn namespace_from_row(row: &Row<'_>) -> rusqlite::Result<Namespace> {
    Ok(Namespace {
        name: row.get(0)?,
        variant_id: uuid_column(row, 1)?,
        description: row.get(2)?,
        info: opt_json_column(row, 3)?,
        created_at: datetime_column(row, 4)?,
        updated_at: datetime_column(row, 5)?,
    })
}

fn require_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_input("namespace name cannot be empty"));
    }
    Ok(())
}

pub(super) fn insert_namespace(
    conn: &Connection,
    tenant: &TenantId,
    namespace: &mut Namespace,
    now: &DateTime<Utc>,
) -> Result<()> {
    if namespace.name.is_empty() {
        namespace.name = DEFAULT_NAMESPACE.to_string();
    }
    namespace.created_at = *now;
    namespace.updated_at = *now;

    conn.execute(
        "INSERT INTO namespaces (name, variant_id, tenant_id, description, info, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            namespace.name,
            namespace.variant_id.to_string(),
            tenant.as_str(),
            namespace.description,
            opt_json_text(namespace.info.as_ref())?,
            format_datetime(now),
        ],
    )
    .map_err(|e| map_constraint(e, &format!("namespace {}", namespace.name)))?;
    Ok(())
}

impl MetadataManager<'_> {
    pub fn create_namespace(&self, ctx: &RequestContext, namespace: &mut Namespace) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        let now = Utc::now();
        self.conn.run(|c| insert_namespace(c, &tenant, namespace, &now))
    }

    pub fn get_namespace(
        &self,
        ctx: &RequestContext,
        name: &str,
        variant_id: Uuid,
    ) -> Result<Namespace> {
        let tenant = self.conn.tenant(ctx)?;
        require_name(name)?;
        let row = self.conn.run(|c| {
            c.query_row(
                "SELECT name, variant_id, description, info, created_at, updated_at
                 FROM namespaces WHERE tenant_id = ?1 AND variant_id = ?2 AND name = ?3",
                params![tenant.as_str(), variant_id.to_string(), name],
                namespace_from_row,
            )
            .optional()
            .map_err(Error::from)
        })?;
        row.ok_or_else(|| Error::not_found(format!("namespace {name}")))
    }

    /// Replaces description and info of an existing namespace.
    pub fn update_namespace(&self, ctx: &RequestContext, namespace: &Namespace) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        require_name(&namespace.name)?;
        let info = opt_json_text(namespace.info.as_ref())?;

        let rows = self.conn.run(|c| {
            c.execute(
                "UPDATE namespaces SET description = ?1, info = ?2, updated_at = ?3
                 WHERE tenant_id = ?4 AND variant_id = ?5 AND name = ?6",
                params![
                    namespace.description,
                    info,
                    format_datetime(&Utc::now()),
                    tenant.as_str(),
                    namespace.variant_id.to_string(),
                    namespace.name,
                ],
            )
            .map_err(|e| map_constraint(e, &format!("namespace {}", namespace.name)))
        })?;
        if rows == 0 {
            return Err(Error::not_found(format!("namespace {}", namespace.name)));
        }
        Ok(())
    }

    /// Deletes a namespace and purges its paths from both of the variant's
    /// directories, all in one write transaction. The root namespace cannot be deleted.
    pub fn delete_namespace(
        &self,
        ctx: &RequestContext,
        name: &str,
        variant_id: Uuid,
    ) -> Result<bool> {
        let tenant = self.conn.tenant(ctx)?;
        require_name(name)?;
        if name == DEFAULT_NAMESPACE {
            return Err(Error::invalid_input("the root namespace cannot be deleted"));
        }

        let purged = self.conn.transaction(TransactionBehavior::Immediate, |tx| {
            let directories: Option<(Uuid, Uuid)> = tx
                .query_row(
                    "SELECT resource_directory, skillset_directory FROM variants
                     WHERE tenant_id = ?1 AND variant_id = ?2",
                    params![tenant.as_str(), variant_id.to_string()],
                    |row| Ok((uuid_column(row, 0)?, uuid_column(row, 1)?)),
                )
                .optional()?;
            let Some((resources, skillsets)) = directories else {
                return Ok(None);
            };

            let deleted = tx.execute(
                "DELETE FROM namespaces WHERE tenant_id = ?1 AND variant_id = ?2 AND name = ?3",
                params![tenant.as_str(), variant_id.to_string(), name],
            )?;
            if deleted == 0 {
                return Ok(None);
            }

            let mut removed = purge_namespace(tx, ObjectKind::Resource, &tenant, resources, name)?;
            removed.extend(purge_namespace(tx, ObjectKind::SkillSet, &tenant, skillsets, name)?);
            Ok(Some(removed.len()))
        })?;

        match purged {
            Some(paths) => {
                info!(tenant = %tenant, namespace = name, %variant_id, paths, "Deleted namespace");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn list_namespaces_by_variant(
        &self,
        ctx: &RequestContext,
        variant_id: Uuid,
    ) -> Result<Vec<Namespace>> {
        let tenant = self.conn.tenant(ctx)?;
        self.conn.run(|c| {
            let mut stmt = c.prepare(
                "SELECT name, variant_id, description, info, created_at, updated_at
                 FROM namespaces WHERE tenant_id = ?1 AND variant_id = ?2 ORDER BY name",
            )?;
            let rows =
                stmt.query_map(params![tenant.as_str(), variant_id.to_string()], namespace_from_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(Error::from)
        })
    }
}
