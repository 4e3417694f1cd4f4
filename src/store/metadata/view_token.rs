use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::warn;
use uuid::Uuid;

use super::MetadataManager;
use crate::error::{Error, Result};
use crate::store::{datetime_column, format_datetime, map_constraint, uuid_column};
use crate::types::{RequestContext, View, ViewToken};

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<ViewToken> {
    Ok(ViewToken {
        token_id: uuid_column(row, 0)?,
        view_id: uuid_column(row, 1)?,
        expire_at: datetime_column(row, 2)?,
        created_at: datetime_column(row, 3)?,
        updated_at: datetime_column(row, 4)?,
    })
}

impl MetadataManager<'_> {
    /// Issues a token for an existing view. Fills in the token id.
    pub fn create_view_token(&self, ctx: &RequestContext, token: &mut ViewToken) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        if token.view_id.is_nil() {
            return Err(Error::invalid_input("view id is required"));
        }

        let now = Utc::now();
        token.token_id = Uuid::new_v4();
        token.created_at = now;
        token.updated_at = now;

        self.conn.run(|c| {
            c.execute(
                "INSERT INTO view_tokens (token_id, view_id, tenant_id, expire_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    token.token_id.to_string(),
                    token.view_id.to_string(),
                    tenant.as_str(),
                    format_datetime(&token.expire_at),
                    format_datetime(&now),
                ],
            )
            .map_err(|e| map_constraint(e, &format!("view token for view {}", token.view_id)))?;
            Ok(())
        })
    }

    pub fn get_view_token(&self, ctx: &RequestContext, token_id: Uuid) -> Result<ViewToken> {
        let tenant = self.conn.tenant(ctx)?;
        let row = self.conn.run(|c| {
            c.query_row(
                "SELECT token_id, view_id, expire_at, created_at, updated_at
                 FROM view_tokens WHERE tenant_id = ?1 AND token_id = ?2",
                params![tenant.as_str(), token_id.to_string()],
                token_from_row,
            )
            .optional()
            .map_err(Error::from)
        })?;
        row.ok_or_else(|| Error::not_found(format!("view token {token_id}")))
    }

    pub fn update_view_token_expiry(
        &self,
        ctx: &RequestContext,
        token_id: Uuid,
        expire_at: DateTime<Utc>,
    ) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        let rows = self.conn.run(|c| {
            c.execute(
                "UPDATE view_tokens SET expire_at = ?1, updated_at = ?2
                 WHERE tenant_id = ?3 AND token_id = ?4",
                params![
                    format_datetime(&expire_at),
                    format_datetime(&Utc::now()),
                    tenant.as_str(),
                    token_id.to_string(),
                ],
            )
            .map_err(Error::from)
        })?;
        if rows == 0 {
            return Err(Error::not_found(format!("view token {token_id}")));
        }
        Ok(())
    }

    /// Revokes a token.
    pub fn delete_view_token(&self, ctx: &RequestContext, token_id: Uuid) -> Result<bool> {
        let tenant = self.conn.tenant(ctx)?;
        let rows = self.conn.run(|c| {
            c.execute(
                "DELETE FROM view_tokens WHERE tenant_id = ?1 AND token_id = ?2",
                params![tenant.as_str(), token_id.to_string()],
            )
            .map_err(Error::from)
        })?;
        Ok(rows > 0)
    }

    /// Resolves the view a token grants. A revoked, unknown or expired token is
    /// `Unauthorized`.
    pub fn resolve_view_by_token(&self, ctx: &RequestContext, token_id: Uuid) -> Result<View> {
        let token = match self.get_view_token(ctx, token_id) {
            Ok(token) => token,
            Err(Error::NotFound(_)) => {
                warn!(%token_id, "View token not found");
                return Err(Error::Unauthorized);
            }
            Err(e) => return Err(e),
        };
        if token.is_expired_at(Utc::now()) {
            warn!(%token_id, expire_at = %token.expire_at, "View token expired");
            return Err(Error::Unauthorized);
        }
        match self.get_view(ctx, token.view_id) {
            Err(Error::NotFound(_)) => Err(Error::Unauthorized),
            other => other,
        }
    }
}
