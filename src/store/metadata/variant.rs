use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, info};
use uuid::Uuid;

use super::namespace::insert_namespace;
use super::{Lookup, MetadataManager, new_id};
use crate::error::{Error, Result};
use crate::store::directory::insert_directory;
use crate::store::{
    datetime_column, format_datetime, map_constraint, opt_json_column, opt_json_text, uuid_column,
};
use crate::types::{
    DEFAULT_NAMESPACE, Namespace, ObjectKind, RequestContext, TenantId, Variant, VariantSummary,
};

const VARIANT_COLUMNS: &str = "variant_id, name, description, info, catalog_id, \
     resource_directory, skillset_directory, created_at, updated_at";

fn variant_from_row(row: &Row<'_>) -> rusqlite::Result<Variant> {
    Ok(Variant {
        variant_id: uuid_column(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        info: opt_json_column(row, 3)?,
        catalog_id: uuid_column(row, 4)?,
        resource_directory_id: uuid_column(row, 5)?,
        skillset_directory_id: uuid_column(row, 6)?,
        created_at: datetime_column(row, 7)?,
        updated_at: datetime_column(row, 8)?,
    })
}

/// Inserts a variant with its root namespace and both empty directories.
/// Runs inside the caller's transaction.
pub(super) fn insert_variant(
    conn: &Connection,
    tenant: &TenantId,
    variant: &mut Variant,
    now: &DateTime<Utc>,
) -> Result<()> {
    variant.variant_id = new_id(variant.variant_id);
    variant.resource_directory_id = Uuid::new_v4();
    variant.skillset_directory_id = Uuid::new_v4();
    variant.created_at = *now;
    variant.updated_at = *now;

    let inserted = conn.execute(
        "INSERT INTO variants
             (variant_id, name, description, info, catalog_id, resource_directory,
              skillset_directory, tenant_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            variant.variant_id.to_string(),
            variant.name,
            variant.description,
            opt_json_text(variant.info.as_ref())?,
            variant.catalog_id.to_string(),
            variant.resource_directory_id.to_string(),
            variant.skillset_directory_id.to_string(),
            tenant.as_str(),
            format_datetime(now),
        ],
    );
    match inserted.map_err(|e| map_constraint(e, &format!("variant {}", variant.name))) {
        Ok(_) => {}
        Err(Error::InvalidParent(_)) => return Err(Error::InvalidCatalog),
        Err(e) => return Err(e),
    }

    let mut namespace = Namespace::new(variant.variant_id, DEFAULT_NAMESPACE);
    namespace.description = Some("default namespace for the variant".to_string());
    insert_namespace(conn, tenant, &mut namespace, now)?;

    for kind in [ObjectKind::Resource, ObjectKind::SkillSet] {
        insert_directory(conn, tenant, kind, variant.directory_id(kind), variant.variant_id, now)?;
    }
    debug!(variant = %variant.name, variant_id = %variant.variant_id, "Inserted variant");
    Ok(())
}

impl MetadataManager<'_> {
    /// Creates a variant of an existing catalog. Fills in the assigned ids.
    pub fn create_variant(&self, ctx: &RequestContext, variant: &mut Variant) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        if variant.catalog_id.is_nil() {
            return Err(Error::InvalidCatalog);
        }
        let now = Utc::now();
        self.conn.transaction(TransactionBehavior::Immediate, |tx| {
            insert_variant(tx, &tenant, variant, &now)
        })?;
        info!(tenant = %tenant, variant = %variant.name, catalog_id = %variant.catalog_id, "Created variant");
        Ok(())
    }

    /// Looks a variant up by id, or by name within `catalog_id`.
    pub fn get_variant(
        &self,
        ctx: &RequestContext,
        catalog_id: Uuid,
        variant: Lookup<'_>,
    ) -> Result<Variant> {
        let tenant = self.conn.tenant(ctx)?;
        let row = match variant {
            Lookup::Id(id) => {
                let sql = format!("SELECT {VARIANT_COLUMNS} FROM variants WHERE tenant_id = ?1 AND variant_id = ?2");
                self.conn.run(|c| {
                    c.query_row(&sql, params![tenant.as_str(), id.to_string()], variant_from_row)
                        .optional()
                        .map_err(Error::from)
                })?
            }
            Lookup::Name(name) => {
                let sql = format!(
                    "SELECT {VARIANT_COLUMNS} FROM variants
                     WHERE tenant_id = ?1 AND catalog_id = ?2 AND name = ?3"
                );
                self.conn.run(|c| {
                    c.query_row(
                        &sql,
                        params![tenant.as_str(), catalog_id.to_string(), name],
                        variant_from_row,
                    )
                    .optional()
                    .map_err(Error::from)
                })?
            }
        };
        row.ok_or_else(|| Error::not_found("variant"))
    }

    pub fn get_variant_by_id(&self, ctx: &RequestContext, variant_id: Uuid) -> Result<Variant> {
        self.get_variant(ctx, Uuid::nil(), Lookup::Id(variant_id))
    }

    pub fn get_variant_id_from_name(
        &self,
        ctx: &RequestContext,
        catalog_id: Uuid,
        name: &str,
    ) -> Result<Uuid> {
        let tenant = self.conn.tenant(ctx)?;
        let id = self.conn.run(|c| {
            c.query_row(
                "SELECT variant_id FROM variants WHERE tenant_id = ?1 AND catalog_id = ?2 AND name = ?3",
                params![tenant.as_str(), catalog_id.to_string(), name],
                |row| uuid_column(row, 0),
            )
            .optional()
            .map_err(Error::from)
        })?;
        id.ok_or_else(|| Error::not_found(format!("variant {name}")))
    }

    /// Renames a variant and replaces its description and info. Ids and the
    /// owning catalog never change.
    pub fn update_variant(
        &self,
        ctx: &RequestContext,
        variant: Lookup<'_>,
        updated: &Variant,
    ) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        let (column, key) = match variant {
            Lookup::Id(id) => ("variant_id", id.to_string()),
            Lookup::Name(name) => ("name", name.to_string()),
        };
        let sql = format!(
            "UPDATE variants SET name = ?1, description = ?2, info = ?3, updated_at = ?4
             WHERE tenant_id = ?5 AND catalog_id = ?6 AND {column} = ?7"
        );
        let info = opt_json_text(updated.info.as_ref())?;

        let rows = self.conn.run(|c| {
            c.execute(
                &sql,
                params![
                    updated.name,
                    updated.description,
                    info,
                    format_datetime(&Utc::now()),
                    tenant.as_str(),
                    updated.catalog_id.to_string(),
                    key,
                ],
            )
            .map_err(|e| map_constraint(e, &format!("variant {}", updated.name)))
        })?;
        if rows == 0 {
            return Err(Error::not_found(format!("variant {key}")));
        }
        Ok(())
    }

    /// Deletes a variant with its namespaces and directories.
    pub fn delete_variant(
        &self,
        ctx: &RequestContext,
        catalog_id: Uuid,
        variant: Lookup<'_>,
    ) -> Result<bool> {
        let tenant = self.conn.tenant(ctx)?;
        let (column, key) = match variant {
            Lookup::Id(id) => ("variant_id", id.to_string()),
            Lookup::Name(name) => ("name", name.to_string()),
        };
        let sql =
            format!("DELETE FROM variants WHERE tenant_id = ?1 AND catalog_id = ?2 AND {column} = ?3");
        let rows = self.conn.run(|c| {
            c.execute(&sql, params![tenant.as_str(), catalog_id.to_string(), key])
                .map_err(Error::from)
        })?;
        Ok(rows > 0)
    }

    /// Catalog and variant names for a pair of ids.
    pub fn get_metadata_names(
        &self,
        ctx: &RequestContext,
        catalog_id: Uuid,
        variant_id: Uuid,
    ) -> Result<(String, String)> {
        let tenant = self.conn.tenant(ctx)?;
        let names = self.conn.run(|c| {
            c.query_row(
                "SELECT c.name, v.name FROM catalogs c
                 JOIN variants v ON c.catalog_id = v.catalog_id AND c.tenant_id = v.tenant_id
                 WHERE c.tenant_id = ?1 AND c.catalog_id = ?2 AND v.variant_id = ?3",
                params![tenant.as_str(), catalog_id.to_string(), variant_id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(Error::from)
        })?;
        names.ok_or_else(|| Error::not_found(format!("variant {variant_id}")))
    }

    pub fn list_variants_by_catalog(
        &self,
        ctx: &RequestContext,
        catalog_id: Uuid,
    ) -> Result<Vec<VariantSummary>> {
        let tenant = self.conn.tenant(ctx)?;
        self.conn.run(|c| {
            let mut stmt = c.prepare(
                "SELECT variant_id, name, resource_directory, skillset_directory
                 FROM variants WHERE tenant_id = ?1 AND catalog_id = ?2 ORDER BY name",
            )?;
            let rows = stmt.query_map(params![tenant.as_str(), catalog_id.to_string()], |row| {
                Ok(VariantSummary {
                    variant_id: uuid_column(row, 0)?,
                    name: row.get(1)?,
                    resource_directory_id: uuid_column(row, 2)?,
                    skillset_directory_id: uuid_column(row, 3)?,
                })
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(Error::from)
        })
    }
}
