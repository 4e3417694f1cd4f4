use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use tracing::info;
use uuid::Uuid;

use super::MetadataManager;
use crate::error::{Error, Result};
use crate::store::{datetime_column, format_datetime, json_column, map_constraint, uuid_column};
use crate::types::{RequestContext, Tangent, TenantId};

const TANGENT_COLUMNS: &str = "id, info, public_key, status, created_at, updated_at";

fn tangent_from_row(row: &Row<'_>) -> rusqlite::Result<Tangent> {
    Ok(Tangent {
        id: uuid_column(row, 0)?,
        info: json_column(row, 1)?,
        public_key: row.get(2)?,
        status: row.get(3)?,
        created_at: datetime_column(row, 4)?,
        updated_at: datetime_column(row, 5)?,
    })
}

/// What request authentication needs to know about a tangent before any tenant
/// is known.
#[derive(Debug, Clone)]
pub struct TangentCredentials {
    pub tenant_id: TenantId,
    pub public_key: Vec<u8>,
}

fn require_id(tangent: &Tangent) -> Result<()> {
    if tangent.id.is_nil() {
        return Err(Error::invalid_input("tangent id is required"));
    }
    Ok(())
}

impl MetadataManager<'_> {
    pub fn create_tangent(&self, ctx: &RequestContext, tangent: &mut Tangent) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        require_id(tangent)?;
        let info = serde_json::to_string(&tangent.info)?;
        let now = Utc::now();
        tangent.created_at = now;
        tangent.updated_at = now;

        self.conn.run(|c| {
            c.execute(
                "INSERT INTO tangents (id, info, public_key, status, tenant_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    tangent.id.to_string(),
                    info,
                    tangent.public_key,
                    tangent.status,
                    tenant.as_str(),
                    format_datetime(&now),
                ],
            )
            .map_err(|e| map_constraint(e, &format!("tangent {}", tangent.id)))?;
            Ok(())
        })?;
        info!(tenant = %tenant, tangent_id = %tangent.id, "Created tangent");
        Ok(())
    }

    /// Creates the tangent, or refreshes its registration when the id is already
    /// known to this tenant.
    pub fn register_tangent(&self, ctx: &RequestContext, tangent: &Tangent) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        require_id(tangent)?;
        let info = serde_json::to_string(&tangent.info)?;
        let now = format_datetime(&Utc::now());

        let rows = self.conn.run(|c| {
            c.execute(
                "INSERT INTO tangents (id, info, public_key, status, tenant_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT (id) DO UPDATE SET
                     info = excluded.info,
                     public_key = excluded.public_key,
                     status = excluded.status,
                     updated_at = excluded.updated_at
                 WHERE tangents.tenant_id = excluded.tenant_id",
                params![
                    tangent.id.to_string(),
                    info,
                    tangent.public_key,
                    tangent.status,
                    tenant.as_str(),
                    now,
                ],
            )
            .map_err(|e| map_constraint(e, &format!("tangent {}", tangent.id)))
        })?;
        // A conflicting id owned by another tenant leaves the row untouched.
        if rows == 0 {
            return Err(Error::already_exists(format!("tangent {}", tangent.id)));
        }
        info!(tenant = %tenant, tangent_id = %tangent.id, "Registered tangent");
        Ok(())
    }

    pub fn get_tangent(&self, ctx: &RequestContext, id: Uuid) -> Result<Tangent> {
        let tenant = self.conn.tenant(ctx)?;
        let sql = format!("SELECT {TANGENT_COLUMNS} FROM tangents WHERE tenant_id = ?1 AND id = ?2");
        let row = self.conn.run(|c| {
            c.query_row(&sql, params![tenant.as_str(), id.to_string()], tangent_from_row)
                .optional()
                .map_err(Error::from)
        })?;
        row.ok_or_else(|| Error::not_found(format!("tangent {id}")))
    }

    pub fn update_tangent(&self, ctx: &RequestContext, tangent: &Tangent) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        require_id(tangent)?;
        let info = serde_json::to_string(&tangent.info)?;
        let rows = self.conn.run(|c| {
            c.execute(
                "UPDATE tangents SET info = ?1, public_key = ?2, status = ?3, updated_at = ?4
                 WHERE tenant_id = ?5 AND id = ?6",
                params![
                    info,
                    tangent.public_key,
                    tangent.status,
                    format_datetime(&Utc::now()),
                    tenant.as_str(),
                    tangent.id.to_string(),
                ],
            )
            .map_err(|e| map_constraint(e, &format!("tangent {}", tangent.id)))
        })?;
        if rows == 0 {
            return Err(Error::not_found(format!("tangent {}", tangent.id)));
        }
        Ok(())
    }

    pub fn delete_tangent(&self, ctx: &RequestContext, id: Uuid) -> Result<bool> {
        let tenant = self.conn.tenant(ctx)?;
        let rows = self.conn.run(|c| {
            c.execute(
                "DELETE FROM tangents WHERE tenant_id = ?1 AND id = ?2",
                params![tenant.as_str(), id.to_string()],
            )
            .map_err(Error::from)
        })?;
        Ok(rows > 0)
    }

    pub fn list_tangents(&self, ctx: &RequestContext) -> Result<Vec<Tangent>> {
        let tenant = self.conn.tenant(ctx)?;
        let sql = format!(
            "SELECT {TANGENT_COLUMNS} FROM tangents WHERE tenant_id = ?1 ORDER BY created_at, id"
        );
        self.conn.run(|c| {
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(params![tenant.as_str()], tangent_from_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(Error::from)
        })
    }

    /// Looks up the owner and verification key of an active tangent.
    ///
    /// This is the one tenant-owned read that runs before the tenant is known: a
    /// signed request names only its tangent, and the tenant comes from here.
    /// It returns nothing else about the row.
    pub fn tangent_credentials(&self, id: Uuid) -> Result<Option<TangentCredentials>> {
        self.conn.run(|c| {
            c.query_row(
                "SELECT tenant_id, public_key FROM tangents WHERE id = ?1 AND status = 'active'",
                params![id.to_string()],
                |row| {
                    Ok(TangentCredentials {
                        tenant_id: TenantId::new(row.get::<_, String>(0)?),
                        public_key: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use uuid::Uuid;

    use crate::error::Error;
    use crate::store::metadata::testing::{ctx, seeded};
    use crate::types::{RequestContext, Tangent, TangentInfo};

    fn tangent() -> Tangent {
        Tangent::from_info(TangentInfo {
            id: Uuid::new_v4(),
            created_by: "ops".to_string(),
            url: "https://tangent.local".to_string(),
            capabilities: vec!["exec".to_string()],
            public_key_access_key: vec![7; 32],
            public_key_log_signing_key: vec![9; 32],
        })
    }

    #[test]
    fn test_tangent_crud() {
        let temp = TempDir::new().unwrap();
        let (pool, ctx) = seeded(&temp, "T1", "P1");
        let conn = pool.tenant_conn(&ctx).unwrap();
        let meta = conn.metadata();

        let mut t = tangent();
        meta.create_tangent(&ctx, &mut t).unwrap();
        assert!(matches!(meta.create_tangent(&ctx, &mut t.clone()), Err(Error::AlreadyExists(_))));

        let mut nil = tangent();
        nil.id = Uuid::nil();
        assert!(matches!(meta.create_tangent(&ctx, &mut nil), Err(Error::InvalidInput(_))));

        t.info.url = "https://tangent.internal".to_string();
        meta.update_tangent(&ctx, &t).unwrap();
        assert_eq!(meta.get_tangent(&ctx, t.id).unwrap().info.url, "https://tangent.internal");
        assert_eq!(meta.list_tangents(&ctx).unwrap().len(), 1);

        assert!(meta.delete_tangent(&ctx, t.id).unwrap());
        assert!(meta.get_tangent(&ctx, t.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_register_tangent_updates_on_conflict() {
        let temp = TempDir::new().unwrap();
        let (pool, ctx) = seeded(&temp, "T1", "P1");
        let conn = pool.tenant_conn(&ctx).unwrap();
        let meta = conn.metadata();

        let mut t = tangent();
        meta.register_tangent(&ctx, &t).unwrap();
        t.public_key = vec![1; 32];
        meta.register_tangent(&ctx, &t).unwrap();

        let stored = meta.get_tangent(&ctx, t.id).unwrap();
        assert_eq!(stored.public_key, vec![1; 32]);
        assert_eq!(meta.list_tangents(&ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_tangent_ids_are_global() {
        let temp = TempDir::new().unwrap();
        let (pool, t1) = seeded(&temp, "T1", "P1");
        let t2 = ctx("T2", "P2");
        let conn = pool.tenant_conn(&t2).unwrap();
        conn.metadata().create_project_and_tenant(&t2).unwrap();
        conn.close();

        let t = tangent();
        let conn = pool.tenant_conn(&t1).unwrap();
        conn.metadata().register_tangent(&t1, &t).unwrap();
        conn.close();

        let conn = pool.tenant_conn(&t2).unwrap();
        assert!(matches!(
            conn.metadata().register_tangent(&t2, &t),
            Err(Error::AlreadyExists(_))
        ));
        assert!(conn.metadata().get_tangent(&t2, t.id).unwrap_err().is_not_found());
        conn.close();

        let conn = pool.conn(&RequestContext::new()).unwrap();
        let creds = conn.metadata().tangent_credentials(t.id).unwrap().unwrap();
        assert_eq!(creds.tenant_id.as_str(), "T1");
        assert_eq!(creds.public_key, vec![7; 32]);
        assert!(conn.metadata().tangent_credentials(Uuid::new_v4()).unwrap().is_none());
    }
}
