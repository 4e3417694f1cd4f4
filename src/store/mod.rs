//! SQLite-backed storage: the scoped connection pool, the content-addressed
//! object store with its path directories, and the metadata entities.
//!
//! Everything tenant-owned is reached through a [`ScopedConnection`] checked out
//! for one request:
//!
//! ```no_run
//! # use skillvault::{config::DbConfig, store::ScopedPool, types::*};
//! # fn demo() -> skillvault::Result<()> {
//! let pool = ScopedPool::open(DbConfig::with_path("./data/skillvault.db"))?;
//! let ctx = RequestContext::new()
//!     .with_tenant(TenantId::new("T1"))
//!     .with_project(ProjectId::new("P1"));
//! let conn = pool.tenant_conn(&ctx)?;
//! let catalogs = conn.metadata().list_catalogs(&ctx)?;
//! conn.close();
//! # let _ = catalogs;
//! # Ok(())
//! # }
//! ```

mod directory;
mod metadata;
mod objects;
pub mod path;
mod pool;
mod resources;
mod schema;
pub mod scope;

pub use metadata::{Lookup, MetadataManager, TangentCredentials, generate_signing_key};
pub use objects::{ObjectManager, content_hash};
pub use pool::{PoolStats, ScopedConnection, ScopedPool};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{ErrorCode, Row, ffi};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::Error;

/// Classifies a constraint violation into the error callers branch on.
///
/// Anything that is not a constraint violation stays a storage error.
pub(crate) fn map_constraint(err: rusqlite::Error, what: &str) -> Error {
    let Some(failure) = err.sqlite_error().copied() else {
        return Error::Storage(err);
    };
    if failure.code != ErrorCode::ConstraintViolation {
        return Error::Storage(err);
    }

    match failure.extended_code {
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
            Error::already_exists(what)
        }
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Error::InvalidParent(what.to_string()),
        ffi::SQLITE_CONSTRAINT_CHECK | ffi::SQLITE_CONSTRAINT_NOTNULL => {
            Error::invalid_input(format!("{what} failed validation"))
        }
        _ => Error::Storage(err),
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(parse_datetime(&row.get::<_, String>(idx)?))
}

fn opt_datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row.get::<_, Option<String>>(idx)?.as_deref().map(parse_datetime))
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn opt_json_text<T: serde::Serialize>(value: Option<&T>) -> crate::error::Result<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(Error::from)
}
