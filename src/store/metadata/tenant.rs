use chrono::Utc;
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use tracing::info;

use super::MetadataManager;
use crate::error::{Error, Result};
use crate::store::{datetime_column, format_datetime, map_constraint};
use crate::types::{Project, ProjectId, RequestContext, Tenant, TenantId};

fn check_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::invalid_input(format!("{kind} id cannot be empty")));
    }
    Ok(())
}

// Tenant rows are reached through the tenant gate like everything they own: a
// connection can only create, read or delete the tenant it is scoped to.
impl MetadataManager<'_> {
    pub fn create_tenant(&self, ctx: &RequestContext) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        check_id("tenant", tenant.as_str())?;
        self.conn.run(|c| {
            c.execute(
                "INSERT INTO tenants (tenant_id, created_at) VALUES (?1, ?2)",
                params![tenant.as_str(), format_datetime(&Utc::now())],
            )
            .map_err(|e| map_constraint(e, &format!("tenant {tenant}")))?;
            Ok(())
        })?;
        info!(tenant = %tenant, "Created tenant");
        Ok(())
    }

    pub fn get_tenant(&self, ctx: &RequestContext) -> Result<Tenant> {
        let tenant = self.conn.tenant(ctx)?;
        let row = self.conn.run(|c| {
            c.query_row(
                "SELECT tenant_id, created_at FROM tenants WHERE tenant_id = ?1",
                params![tenant.as_str()],
                |row| {
                    Ok(Tenant {
                        tenant_id: TenantId::new(row.get::<_, String>(0)?),
                        created_at: datetime_column(row, 1)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
        })?;
        row.ok_or_else(|| Error::not_found(format!("tenant {tenant}")))
    }

    /// Deletes the context's tenant and, by cascade, everything it owns.
    pub fn delete_tenant(&self, ctx: &RequestContext) -> Result<bool> {
        let tenant = self.conn.tenant(ctx)?;
        let rows = self.conn.run(|c| {
            c.execute("DELETE FROM tenants WHERE tenant_id = ?1", params![tenant.as_str()])
                .map_err(Error::from)
        })?;
        if rows > 0 {
            info!(tenant = %tenant, "Deleted tenant");
        }
        Ok(rows > 0)
    }

    pub fn create_project(&self, ctx: &RequestContext, project_id: &ProjectId) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        check_id("project", project_id.as_str())?;
        self.conn.run(|c| {
            c.execute(
                "INSERT INTO projects (project_id, tenant_id, created_at) VALUES (?1, ?2, ?3)",
                params![project_id.as_str(), tenant.as_str(), format_datetime(&Utc::now())],
            )
            .map_err(|e| map_constraint(e, &format!("project {project_id}")))?;
            Ok(())
        })
    }

    pub fn get_project(&self, ctx: &RequestContext, project_id: &ProjectId) -> Result<Project> {
        let tenant = self.conn.tenant(ctx)?;
        let row = self.conn.run(|c| {
            c.query_row(
                "SELECT project_id, tenant_id, created_at FROM projects
                 WHERE project_id = ?1 AND tenant_id = ?2",
                params![project_id.as_str(), tenant.as_str()],
                |row| {
                    Ok(Project {
                        project_id: ProjectId::new(row.get::<_, String>(0)?),
                        tenant_id: TenantId::new(row.get::<_, String>(1)?),
                        created_at: datetime_column(row, 2)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
        })?;
        row.ok_or_else(|| Error::not_found(format!("project {project_id}")))
    }

    pub fn delete_project(&self, ctx: &RequestContext, project_id: &ProjectId) -> Result<bool> {
        let tenant = self.conn.tenant(ctx)?;
        let rows = self.conn.run(|c| {
            c.execute(
                "DELETE FROM projects WHERE project_id = ?1 AND tenant_id = ?2",
                params![project_id.as_str(), tenant.as_str()],
            )
            .map_err(Error::from)
        })?;
        Ok(rows > 0)
    }

    /// Creates the context's project, creating its tenant first when missing.
    pub fn create_project_and_tenant(&self, ctx: &RequestContext) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        let project = ctx.project_id()?.clone();
        let now = format_datetime(&Utc::now());

        self.conn.transaction(TransactionBehavior::Immediate, |tx| {
            tx.execute(
                "INSERT INTO tenants (tenant_id, created_at) VALUES (?1, ?2)
                 ON CONFLICT (tenant_id) DO NOTHING",
                params![tenant.as_str(), now],
            )
            .map_err(|e| map_constraint(e, &format!("tenant {tenant}")))?;
            tx.execute(
                "INSERT INTO projects (project_id, tenant_id, created_at) VALUES (?1, ?2, ?3)",
                params![project.as_str(), tenant.as_str(), now],
            )
            .map_err(|e| map_constraint(e, &format!("project {project}")))?;
            Ok(())
        })
    }
}
