use std::io::{Read, Write};

use chrono::Utc;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use rusqlite::{OptionalExtension, params};
use serde_json::Value;
use sha2::{Digest, Sha512};
use tracing::debug;

use super::pool::ScopedConnection;
use super::{format_datetime, map_constraint};
use crate::error::{Error, Result};
use crate::types::{CatalogObject, HASH_ID_LEN, ObjectKind, RequestContext};

/// Hex SHA-512 of the compact, key-sorted JSON encoding of `value`.
///
/// `serde_json` keeps object keys ordered, so equal documents hash equally no
/// matter how their keys were written.
pub fn content_hash(value: &Value) -> Result<String> {
    let canonical = serde_json::to_vec(value)?;
    Ok(hex::encode(Sha512::digest(&canonical)))
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn validate_hash(hash: &str) -> Result<()> {
    if hash.len() < HASH_ID_LEN || !hash.is_ascii() {
        return Err(Error::invalid_input(format!(
            "hash must be at least {HASH_ID_LEN} ASCII characters"
        )));
    }
    Ok(())
}

/// Object store and directory operations on one scoped connection.
pub struct ObjectManager<'c> {
    pub(super) conn: &'c ScopedConnection,
}

impl ScopedConnection {
    #[must_use]
    pub fn objects(&self) -> ObjectManager<'_> {
        ObjectManager { conn: self }
    }
}

impl ObjectManager<'_> {
    /// Stores an object under its hash. A hash already present for the tenant
    /// yields `AlreadyExists` and leaves the stored body untouched.
    pub fn create_catalog_object(&self, ctx: &RequestContext, obj: &CatalogObject) -> Result<()> {
        let tenant = self.conn.tenant(ctx)?;
        validate_hash(&obj.hash)?;
        if obj.version.is_empty() {
            return Err(Error::invalid_input("version cannot be empty"));
        }
        if obj.data.is_empty() {
            return Err(Error::invalid_input("data cannot be empty"));
        }

        let compressed = self.conn.config().compress_objects;
        let body = if compressed {
            let packed = compress(&obj.data)?;
            debug!(raw = obj.data.len(), compressed = packed.len(), "Compressed catalog object");
            packed
        } else {
            obj.data.clone()
        };

        self.conn.run(|c| {
            let inserted = c
                .execute(
                    "INSERT INTO catalog_objects
                         (hash, hash_id, type, version, tenant_id, compressed, data, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(tenant_id, hash) DO NOTHING",
                    params![
                        obj.hash,
                        obj.hash_id(),
                        obj.kind.as_str(),
                        obj.version,
                        tenant.as_str(),
                        compressed,
                        body,
                        format_datetime(&Utc::now()),
                    ],
                )
                .map_err(|e| map_constraint(e, "catalog object"))?;

            if inserted == 0 {
                return Err(Error::already_exists(format!("catalog object {}", obj.hash)));
            }
            Ok(())
        })
    }

    pub fn get_catalog_object(&self, ctx: &RequestContext, hash: &str) -> Result<CatalogObject> {
        let tenant = self.conn.tenant(ctx)?;
        validate_hash(hash)?;

        let row = self.conn.run(|c| {
            c.query_row(
                "SELECT hash, type, version, compressed, data FROM catalog_objects
                 WHERE tenant_id = ?1 AND hash_id = ?2 AND hash = ?3",
                params![tenant.as_str(), &hash[..HASH_ID_LEN], hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(Error::from)
        })?;

        let Some((hash, kind, version, compressed, data)) = row else {
            return Err(Error::not_found(format!("catalog object {hash}")));
        };
        let data = if compressed { decompress(&data)? } else { data };

        Ok(CatalogObject {
            hash,
            kind: kind.parse()?,
            version,
            data,
        })
    }

    /// Deletes an object unless a directory of the same kind still points at it.
    /// Returns whether a row was removed.
    pub fn delete_catalog_object(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        hash: &str,
    ) -> Result<bool> {
        let tenant = self.conn.tenant(ctx)?;
        validate_hash(hash)?;

        let sql = format!(
            "DELETE FROM catalog_objects
             WHERE tenant_id = ?1 AND hash_id = ?2 AND hash = ?3
               AND NOT EXISTS (
                   SELECT 1 FROM {table} d, json_each(d.directory) e
                   WHERE d.tenant_id = ?1 AND json_extract(e.value, '$.hash') = ?3
               )",
            table = kind.directory_table()
        );

        self.conn.run(|c| {
            let deleted = c.execute(&sql, params![tenant.as_str(), &hash[..HASH_ID_LEN], hash])?;
            Ok(deleted > 0)
        })
    }
}
