//! System-wide signing keys. These are not tenant-owned, so none of these
//! operations go through the tenant gate.

use chrono::Utc;
use ed25519_dalek::SigningKey as Ed25519Key;
use rand::rngs::OsRng;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::info;
use uuid::Uuid;

use super::{MetadataManager, new_id};
use crate::error::{Error, Result};
use crate::store::{datetime_column, format_datetime, map_constraint, uuid_column};
use crate::types::SigningKey;

const KEY_COLUMNS: &str = "key_id, public_key, private_key, is_active, created_at, updated_at";

fn key_from_row(row: &Row<'_>) -> rusqlite::Result<SigningKey> {
    Ok(SigningKey {
        key_id: uuid_column(row, 0)?,
        public_key: row.get(1)?,
        private_key: row.get(2)?,
        is_active: row.get(3)?,
        created_at: datetime_column(row, 4)?,
        updated_at: datetime_column(row, 5)?,
    })
}

/// Creates a fresh Ed25519 key pair, inactive and without an id.
#[must_use]
pub fn generate_signing_key() -> SigningKey {
    let key = Ed25519Key::generate(&mut OsRng);
    let now = Utc::now();
    SigningKey {
        key_id: Uuid::nil(),
        public_key: key.verifying_key().to_bytes().to_vec(),
        private_key: key.to_bytes().to_vec(),
        is_active: false,
        created_at: now,
        updated_at: now,
    }
}

fn deactivate_others(conn: &Connection, key_id: Uuid, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE signing_keys SET is_active = 0, updated_at = ?1
         WHERE is_active = 1 AND key_id <> ?2",
        params![now, key_id.to_string()],
    )?;
    Ok(())
}

impl MetadataManager<'_> {
    /// Stores a key. Storing an active key deactivates every other key.
    pub fn create_signing_key(&self, key: &mut SigningKey) -> Result<()> {
        if key.public_key.is_empty() || key.private_key.is_empty() {
            return Err(Error::invalid_input("signing key material is required"));
        }
        key.key_id = new_id(key.key_id);
        let now = Utc::now();
        key.created_at = now;
        key.updated_at = now;
        let stamp = format_datetime(&now);

        self.conn.transaction(TransactionBehavior::Immediate, |tx| {
            if key.is_active {
                deactivate_others(tx, key.key_id, &stamp)?;
            }
            tx.execute(
                "INSERT INTO signing_keys (key_id, public_key, private_key, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    key.key_id.to_string(),
                    key.public_key,
                    key.private_key,
                    key.is_active,
                    stamp,
                ],
            )
            .map_err(|e| map_constraint(e, &format!("signing key {}", key.key_id)))?;
            Ok(())
        })?;
        info!(key_id = %key.key_id, active = key.is_active, "Created signing key");
        Ok(())
    }

    pub fn get_signing_key(&self, key_id: Uuid) -> Result<SigningKey> {
        let sql = format!("SELECT {KEY_COLUMNS} FROM signing_keys WHERE key_id = ?1");
        let row = self.conn.run(|c| {
            c.query_row(&sql, params![key_id.to_string()], key_from_row)
                .optional()
                .map_err(Error::from)
        })?;
        row.ok_or_else(|| Error::not_found(format!("signing key {key_id}")))
    }

    pub fn get_active_signing_key(&self) -> Result<SigningKey> {
        let sql = format!("SELECT {KEY_COLUMNS} FROM signing_keys WHERE is_active = 1");
        let row = self.conn.run(|c| {
            c.query_row(&sql, [], key_from_row)
                .optional()
                .map_err(Error::from)
        })?;
        row.ok_or_else(|| Error::not_found("active signing key"))
    }

    /// Activates or deactivates a key. At most one key is active afterwards.
    pub fn update_signing_key_active(&self, key_id: Uuid, active: bool) -> Result<()> {
        let now = format_datetime(&Utc::now());
        self.conn.transaction(TransactionBehavior::Immediate, |tx| {
            if active {
                deactivate_others(tx, key_id, &now)?;
            }
            let rows = tx.execute(
                "UPDATE signing_keys SET is_active = ?1, updated_at = ?2 WHERE key_id = ?3",
                params![active, now, key_id.to_string()],
            )?;
            if rows == 0 {
                return Err(Error::not_found(format!("signing key {key_id}")));
            }
            Ok(())
        })?;
        info!(%key_id, active, "Updated signing key");
        Ok(())
    }

    pub fn delete_signing_key(&self, key_id: Uuid) -> Result<bool> {
        let rows = self.conn.run(|c| {
            c.execute(
                "DELETE FROM signing_keys WHERE key_id = ?1",
                params![key_id.to_string()],
            )
            .map_err(Error::from)
        })?;
        Ok(rows > 0)
    }
}
