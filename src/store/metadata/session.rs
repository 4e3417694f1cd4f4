use chrono::Utc;
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::MetadataManager;
use crate::error::{Error, Result};
use crate::store::{
    datetime_column, format_datetime, json_column, map_constraint, opt_datetime_column,
    uuid_column,
};
use crate::types::{RequestContext, Session, SessionStatus};

const SESSION_COLUMNS: &str = "session_id, skillset, skill, view_id, tangent_id, status_summary, \
     status, info, user_id, catalog_id, variant_id, started_at, ended_at, expires_at, \
     created_at, updated_at";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let summary: String = row.get(5)?;
    Ok(Session {
        session_id: uuid_column(row, 0)?,
        skillset: row.get(1)?,
        skill: row.get(2)?,
        view_id: uuid_column(row, 3)?,
        tangent_id: uuid_column(row, 4)?,
        status_summary: summary.parse().map_err(|e: Error| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        status: json_column(row, 6)?,
        info: json_column(row, 7)?,
        user_id: row.get(8)?,
        catalog_id: uuid_column(row, 9)?,
        variant_id: uuid_column(row, 10)?,
        started_at: datetime_column(row, 11)?,
        ended_at: opt_datetime_column(row, 12)?,
        expires_at: datetime_column(row, 13)?,
        created_at: datetime_column(row, 14)?,
        updated_at: datetime_column(row, 15)?,
    })
}

impl MetadataManager<'_> {
    /// Creates or replaces a session by id.
    ///
    /// A replay never moves the session backwards: when the stored status ranks
    /// above the incoming one, or the session has already ended, the stored
    /// status is kept. A session that lands on a terminal status gets an end time.
    pub fn upsert_session(&self, ctx: &RequestContext, session: &Session) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        if session.session_id.is_nil() {
            return Err(Error::invalid_input("session id is required"));
        }
        let info = serde_json::to_string(&session.info)?;
        let now = Utc::now();

        let summary = self.conn.transaction(TransactionBehavior::Immediate, |tx| {
            let stored: Option<(String, String, bool)> = tx
                .query_row(
                    "SELECT status_summary, status, ended_at IS NOT NULL FROM sessions
                     WHERE tenant_id = ?1 AND session_id = ?2",
                    params![tenant.as_str(), session.session_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let (summary, status) = match stored {
                Some((current, status, ended)) => {
                    let current: SessionStatus = current.parse()?;
                    if ended || current.rank() > session.status_summary.rank() {
                        (current, status)
                    } else {
                        (session.status_summary, serde_json::to_string(&session.status)?)
                    }
                }
                None => (session.status_summary, serde_json::to_string(&session.status)?),
            };
            let ended_at = session
                .ended_at
                .or_else(|| summary.is_terminal().then_some(now));

            tx.execute(
                "INSERT INTO sessions (session_id, skillset, skill, view_id, tangent_id, status_summary,
                     status, info, user_id, catalog_id, variant_id, tenant_id, started_at, ended_at,
                     expires_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
                 ON CONFLICT (tenant_id, session_id) DO UPDATE SET
                     skillset = excluded.skillset,
                     skill = excluded.skill,
                     view_id = excluded.view_id,
                     tangent_id = excluded.tangent_id,
                     status_summary = excluded.status_summary,
                     status = excluded.status,
                     info = excluded.info,
                     user_id = excluded.user_id,
                     catalog_id = excluded.catalog_id,
                     variant_id = excluded.variant_id,
                     started_at = excluded.started_at,
                     ended_at = COALESCE(sessions.ended_at, excluded.ended_at),
                     expires_at = excluded.expires_at,
                     updated_at = excluded.updated_at",
                params![
                    session.session_id.to_string(),
                    session.skillset,
                    session.skill,
                    session.view_id.to_string(),
                    session.tangent_id.to_string(),
                    summary.as_str(),
                    status,
                    info,
                    session.user_id,
                    session.catalog_id.to_string(),
                    session.variant_id.to_string(),
                    tenant.as_str(),
                    format_datetime(&session.started_at),
                    ended_at.as_ref().map(format_datetime),
                    format_datetime(&session.expires_at),
                    format_datetime(&now),
                ],
            )
            .map_err(|e| map_constraint(e, &format!("session {}", session.session_id)))?;
            Ok(summary)
        })?;
        debug!(session_id = %session.session_id, status = %summary, "Upserted session");
        Ok(())
    }

    pub fn get_session(&self, ctx: &RequestContext, session_id: Uuid) -> Result<Session> {
        let tenant = self.conn.tenant(ctx)?;
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE tenant_id = ?1 AND session_id = ?2");
        let row = self.conn.run(|c| {
            c.query_row(&sql, params![tenant.as_str(), session_id.to_string()], session_from_row)
                .optional()
                .map_err(Error::from)
        })?;
        row.ok_or_else(|| Error::not_found(format!("session {session_id}")))
    }

    /// Moves a session forward. Going back to an earlier stage is `InvalidInput`.
    ///
    /// A terminal status also ends the session if it has not ended yet.
    pub fn update_session_status(
        &self,
        ctx: &RequestContext,
        session_id: Uuid,
        summary: SessionStatus,
        status: &Value,
    ) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        let status = serde_json::to_string(status)?;

        self.conn.transaction(TransactionBehavior::Immediate, |tx| {
            let current: Option<String> = tx
                .query_row(
                    "SELECT status_summary FROM sessions WHERE tenant_id = ?1 AND session_id = ?2",
                    params![tenant.as_str(), session_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let current: SessionStatus = current
                .ok_or_else(|| Error::not_found(format!("session {session_id}")))?
                .parse()?;
            if !current.can_transition_to(summary) {
                return Err(Error::invalid_input(format!(
                    "session cannot move from {current} to {summary}"
                )));
            }

            let now = format_datetime(&Utc::now());
            tx.execute(
                "UPDATE sessions SET status_summary = ?1, status = ?2, updated_at = ?3,
                     ended_at = CASE WHEN ?6 THEN COALESCE(ended_at, ?3) ELSE ended_at END
                 WHERE tenant_id = ?4 AND session_id = ?5",
                params![
                    summary.as_str(),
                    status,
                    now,
                    tenant.as_str(),
                    session_id.to_string(),
                    summary.is_terminal(),
                ],
            )?;
            Ok(())
        })
    }

    /// Ends a session with a terminal status.
    pub fn update_session_end(
        &self,
        ctx: &RequestContext,
        session_id: Uuid,
        summary: SessionStatus,
        status: &Value,
    ) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        if !summary.is_terminal() {
            return Err(Error::invalid_input(format!(
                "{summary} is not a terminal session status"
            )));
        }
        let status = serde_json::to_string(status)?;
        let now = format_datetime(&Utc::now());

        let rows = self.conn.run(|c| {
            c.execute(
                "UPDATE sessions SET status_summary = ?1, status = ?2, ended_at = ?3, updated_at = ?3
                 WHERE tenant_id = ?4 AND session_id = ?5",
                params![summary.as_str(), status, now, tenant.as_str(), session_id.to_string()],
            )
            .map_err(Error::from)
        })?;
        if rows == 0 {
            return Err(Error::not_found(format!("session {session_id}")));
        }
        info!(%session_id, status = %summary, "Session ended");
        Ok(())
    }

    pub fn update_session_info(
        &self,
        ctx: &RequestContext,
        session_id: Uuid,
        info: &Value,
    ) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        let info = serde_json::to_string(info)?;
        let rows = self.conn.run(|c| {
            c.execute(
                "UPDATE sessions SET info = ?1, updated_at = ?2 WHERE tenant_id = ?3 AND session_id = ?4",
                params![info, format_datetime(&Utc::now()), tenant.as_str(), session_id.to_string()],
            )
            .map_err(Error::from)
        })?;
        if rows == 0 {
            return Err(Error::not_found(format!("session {session_id}")));
        }
        Ok(())
    }

    pub fn delete_session(&self, ctx: &RequestContext, session_id: Uuid) -> Result<bool> {
        let tenant = self.conn.tenant(ctx)?;
        let rows = self.conn.run(|c| {
            c.execute(
                "DELETE FROM sessions WHERE tenant_id = ?1 AND session_id = ?2",
                params![tenant.as_str(), session_id.to_string()],
            )
            .map_err(Error::from)
        })?;
        Ok(rows > 0)
    }

    /// Sessions of a catalog, newest first.
    pub fn list_sessions_by_catalog(
        &self,
        ctx: &RequestContext,
        catalog_id: Uuid,
    ) -> Result<Vec<Session>> {
        let tenant = self.conn.tenant(ctx)?;
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE tenant_id = ?1 AND catalog_id = ?2 ORDER BY created_at DESC, session_id"
        );
        self.conn.run(|c| {
            let mut stmt = c.prepare(&sql)?;
            let rows =
                stmt.query_map(params![tenant.as_str(), catalog_id.to_string()], session_from_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(Error::from)
        })
    }
}
