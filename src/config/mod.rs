mod db;
mod server;

pub use db::{DEFAULT_SCOPES, DbConfig, PROJECT_SCOPE, TENANT_SCOPE};
pub use server::ServerConfig;
