//! # skillvault
//!
//! A multi-tenant control plane for catalogs of content-addressed skillsets and
//! resources, with every access checked against revocable, declarative views.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use skillvault::config::DbConfig;
//! use skillvault::store::ScopedPool;
//! use skillvault::types::{Catalog, ProjectId, RequestContext, TenantId, UserContext};
//!
//! let pool = ScopedPool::open(DbConfig::with_path("./data/skillvault.db"))?;
//! let ctx = RequestContext::new()
//!     .with_tenant(TenantId::new("T1"))
//!     .with_project(ProjectId::new("P1"))
//!     .with_user(UserContext::user("alice"));
//!
//! let conn = pool.tenant_conn(&ctx)?;
//! conn.metadata().create_project_and_tenant(&ctx)?;
//! conn.metadata().create_catalog(&ctx, &mut Catalog::new("acme"))?;
//! conn.close();
//! ```
//!
//! Routes are guarded with two axum layers: [`auth::tangent_auth`] for requests
//! signed by a registered runtime, and [`policy::enforce_layer`] for view-based
//! authorization.

pub mod auth;
pub mod config;
pub mod error;
pub mod policy;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod types;

pub use error::{Error, Result};
