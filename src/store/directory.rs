use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, error};
use uuid::Uuid;

use super::objects::ObjectManager;
use super::path::{json_key, namespace_prefix, validate_path};
use super::{datetime_column, format_datetime, map_constraint, uuid_column};
use crate::error::{Error, Result};
use crate::types::{
    CatalogObject, Directory, ObjectKind, ObjectRef, RequestContext, SchemaDirectory, TenantId,
};

/// Inserts an empty directory row. Runs inside the caller's variant transaction.
pub(super) fn insert_directory(
    conn: &Connection,
    tenant: &TenantId,
    kind: ObjectKind,
    directory_id: Uuid,
    variant_id: Uuid,
    now: &DateTime<Utc>,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (directory_id, variant_id, tenant_id, directory, created_at, updated_at)
         VALUES (?1, ?2, ?3, '{{}}', ?4, ?4)",
        kind.directory_table()
    );
    conn.execute(
        &sql,
        params![
            directory_id.to_string(),
            variant_id.to_string(),
            tenant.as_str(),
            format_datetime(now),
        ],
    )
    .map_err(|e| map_constraint(e, &format!("{kind} directory")))?;
    Ok(())
}

fn read_entry(
    conn: &Connection,
    kind: ObjectKind,
    tenant: &TenantId,
    directory_id: Uuid,
    path: &str,
) -> Result<Option<ObjectRef>> {
    let sql = format!(
        "SELECT json_extract(directory, ?1) FROM {} WHERE tenant_id = ?2 AND directory_id = ?3",
        kind.directory_table()
    );
    let raw: Option<Option<String>> = conn
        .query_row(
            &sql,
            params![json_key(path), tenant.as_str(), directory_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    match raw.flatten() {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

fn read_directory(
    conn: &Connection,
    kind: ObjectKind,
    tenant: &TenantId,
    directory_id: Uuid,
) -> Result<Directory> {
    let sql = format!(
        "SELECT directory FROM {} WHERE tenant_id = ?1 AND directory_id = ?2",
        kind.directory_table()
    );
    let raw: Option<String> = conn
        .query_row(
            &sql,
            params![tenant.as_str(), directory_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    let raw = raw.ok_or_else(|| Error::not_found(format!("{kind} directory {directory_id}")))?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_directory(
    conn: &Connection,
    kind: ObjectKind,
    tenant: &TenantId,
    directory_id: Uuid,
    directory: &Directory,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET directory = ?1, updated_at = ?2 WHERE tenant_id = ?3 AND directory_id = ?4",
        kind.directory_table()
    );
    let updated = conn.execute(
        &sql,
        params![
            serde_json::to_string(directory)?,
            format_datetime(&Utc::now()),
            tenant.as_str(),
            directory_id.to_string(),
        ],
    )?;
    if updated == 0 {
        return Err(Error::not_found(format!("{kind} directory {directory_id}")));
    }
    Ok(())
}

/// Removes every path of `namespace` from one directory. Must run inside a write
/// transaction.
pub(super) fn purge_namespace(
    conn: &Connection,
    kind: ObjectKind,
    tenant: &TenantId,
    directory_id: Uuid,
    namespace: &str,
) -> Result<Vec<String>> {
    let prefix = namespace_prefix(namespace);
    let mut directory = read_directory(conn, kind, tenant, directory_id)?;

    let removed: Vec<String> = directory
        .keys()
        .filter(|path| path.starts_with(&prefix))
        .cloned()
        .collect();
    if removed.is_empty() {
        return Ok(removed);
    }

    directory.retain(|path, _| !path.starts_with(&prefix));
    write_directory(conn, kind, tenant, directory_id, &directory)?;
    debug!(namespace, %kind, removed = removed.len(), "Deleted namespace objects");
    Ok(removed)
}

impl ObjectManager<'_> {
    pub fn get_schema_directory(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
    ) -> Result<SchemaDirectory> {
        let tenant = self.conn.tenant(ctx)?;
        let sql = format!(
            "SELECT directory_id, variant_id, directory, created_at, updated_at
             FROM {} WHERE tenant_id = ?1 AND directory_id = ?2",
            kind.directory_table()
        );

        let row = self.conn.run(|c| {
            c.query_row(
                &sql,
                params![tenant.as_str(), directory_id.to_string()],
                |row| {
                    Ok((
                        uuid_column(row, 0)?,
                        uuid_column(row, 1)?,
                        row.get::<_, String>(2)?,
                        datetime_column(row, 3)?,
                        datetime_column(row, 4)?,
                    ))
                },
            )
            .optional()
            .map_err(Error::from)
        })?;

        let (directory_id, variant_id, raw, created_at, updated_at) =
            row.ok_or_else(|| Error::not_found(format!("{kind} directory {directory_id}")))?;

        Ok(SchemaDirectory {
            directory_id,
            variant_id,
            kind,
            directory: serde_json::from_str(&raw)?,
            created_at,
            updated_at,
        })
    }

    /// Replaces the whole directory document.
    pub fn set_directory(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
        directory: &Directory,
    ) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        for path in directory.keys() {
            validate_path(path)?;
        }
        self.conn
            .run(|c| write_directory(c, kind, &tenant, directory_id, directory))
    }

    /// Writes one path entry in place. The update and the read-back that confirms
    /// the stored hash run in a single write transaction.
    pub fn add_or_update_object_by_path(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
        path: &str,
        obj: &ObjectRef,
    ) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        validate_path(path)?;
        if obj.hash.is_empty() {
            return Err(Error::invalid_input("object reference has no hash"));
        }
        let entry = serde_json::to_string(obj)?;

        let sql = format!(
            "UPDATE {} SET directory = json_set(directory, ?1, json(?2)), updated_at = ?3
             WHERE tenant_id = ?4 AND directory_id = ?5",
            kind.directory_table()
        );

        self.conn.transaction(TransactionBehavior::Immediate, |tx| {
            let updated = tx.execute(
                &sql,
                params![
                    json_key(path),
                    entry,
                    format_datetime(&Utc::now()),
                    tenant.as_str(),
                    directory_id.to_string(),
                ],
            )?;
            if updated == 0 {
                return Err(Error::not_found(format!("{kind} directory {directory_id}")));
            }

            let stored = read_entry(tx, kind, &tenant, directory_id, path)?;
            match stored {
                Some(stored) if stored.hash == obj.hash => Ok(()),
                _ => {
                    error!(path, %directory_id, "Directory entry did not persist as written");
                    Err(Error::Integrity(format!("hash mismatch at {path}")))
                }
            }
        })
    }

    pub fn get_object_ref_by_path(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
        path: &str,
    ) -> Result<ObjectRef> {
        let tenant = self.conn.tenant(ctx)?;
        validate_path(path)?;
        self.conn
            .run(|c| read_entry(c, kind, &tenant, directory_id, path))?
            .ok_or_else(|| Error::not_found(format!("{kind} at {path}")))
    }

    /// Resolves a path through to the object it references.
    pub fn load_object_by_path(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
        path: &str,
    ) -> Result<CatalogObject> {
        let obj_ref = self.get_object_ref_by_path(ctx, kind, directory_id, path)?;
        self.get_catalog_object(ctx, &obj_ref.hash)
    }

    /// Removes one path and returns the hash it pointed at. A missing path is not
    /// an error.
    pub fn delete_object_by_path(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
        path: &str,
    ) -> Result<Option<String>> {
        let tenant = self.conn.tenant(ctx)?;
        validate_path(path)?;
        debug!(path, %directory_id, "Deleting object by path");

        let sql = format!(
            "UPDATE {} SET directory = json_remove(directory, ?1), updated_at = ?2
             WHERE tenant_id = ?3 AND directory_id = ?4",
            kind.directory_table()
        );

        self.conn.transaction(TransactionBehavior::Immediate, |tx| {
            let Some(existing) = read_entry(tx, kind, &tenant, directory_id, path)? else {
                return Ok(None);
            };
            tx.execute(
                &sql,
                params![
                    json_key(path),
                    format_datetime(&Utc::now()),
                    tenant.as_str(),
                    directory_id.to_string(),
                ],
            )?;
            Ok(Some(existing.hash))
        })
    }

    pub fn path_exists(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
        path: &str,
    ) -> Result<bool> {
        let tenant = self.conn.tenant(ctx)?;
        validate_path(path)?;
        let sql = format!(
            "SELECT json_type(directory, ?1) IS NOT NULL FROM {}
             WHERE tenant_id = ?2 AND directory_id = ?3",
            kind.directory_table()
        );

        let exists: Option<bool> = self.conn.run(|c| {
            c.query_row(
                &sql,
                params![json_key(path), tenant.as_str(), directory_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(Error::from)
        })?;
        exists.ok_or_else(|| Error::not_found(format!("{kind} directory {directory_id}")))
    }

    /// Removes every path under `/--root--/<namespace>/` and returns the removed paths.
    ///
    /// The whole read-filter-write cycle holds the database write lock, so a point
    /// update to the same directory lands either before or after it, never in between.
    pub fn delete_namespace_objects(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
        namespace: &str,
    ) -> Result<Vec<String>> {
        let tenant = self.conn.tenant(ctx)?;
        if namespace.is_empty() {
            return Err(Error::invalid_input("namespace cannot be empty"));
        }
        self.conn.transaction(TransactionBehavior::Immediate, |tx| {
            purge_namespace(tx, kind, &tenant, directory_id, namespace)
        })
    }
}
