//! CRUD for the first-class entities. Every tenant-owned operation resolves its
//! tenant through the connection's tenant gate before touching a table.

mod catalog;
mod namespace;
mod session;
mod signing_key;
mod tangent;
mod tenant;
mod variant;
mod view;
mod view_token;

use uuid::Uuid;

use super::pool::ScopedConnection;
use crate::error::{Error, Result};

pub use signing_key::generate_signing_key;
pub use tangent::TangentCredentials;

/// Metadata operations on one scoped connection.
pub struct MetadataManager<'c> {
    conn: &'c ScopedConnection,
}

impl ScopedConnection {
    #[must_use]
    pub fn metadata(&self) -> MetadataManager<'_> {
        MetadataManager { conn: self }
    }
}

/// How a caller names an entity that has both an id and a unique name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    Id(Uuid),
    Name(&'a str),
}

impl<'a> Lookup<'a> {
    /// The id wins when both are given; giving neither is an error.
    pub fn resolve(id: Option<Uuid>, name: &'a str) -> Result<Self> {
        match id {
            Some(id) if !id.is_nil() => Ok(Self::Id(id)),
            _ if !name.is_empty() => Ok(Self::Name(name)),
            _ => Err(Error::invalid_input("either an id or a name must be provided")),
        }
    }
}

impl From<Uuid> for Lookup<'_> {
    fn from(id: Uuid) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a str> for Lookup<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

fn new_id(id: Uuid) -> Uuid {
    if id.is_nil() { Uuid::new_v4() } else { id }
}
