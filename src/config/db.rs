use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::scope::is_valid_scope_name;

/// Scope variable carrying the tenant a connection is bound to.
pub const TENANT_SCOPE: &str = "skillvault.tenant_id";

/// Scope variable carrying the project a connection is bound to.
pub const PROJECT_SCOPE: &str = "skillvault.project_id";

pub const DEFAULT_SCOPES: &[&str] = &[TENANT_SCOPE, PROJECT_SCOPE];

/// Connection pool and storage settings.
///
/// Durations are expressed in milliseconds when read from TOML:
///
/// ```toml
/// path = "./data/skillvault.db"
/// max_open = 16
/// statement_timeout_ms = 5000
/// scopes = ["skillvault.tenant_id", "skillvault.project_id"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub path: PathBuf,
    pub max_open: u32,
    /// Idle connections the pool keeps warm.
    pub min_idle: u32,
    pub idle_timeout_ms: u64,
    pub max_lifetime_ms: u64,
    pub acquire_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    pub statement_timeout_ms: u64,
    pub transaction_timeout_ms: u64,
    /// Allow-list of scope variable names a connection may carry.
    pub scopes: Vec<String>,
    pub compress_objects: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/skillvault.db"),
            max_open: 16,
            min_idle: 1,
            idle_timeout_ms: 10 * 60 * 1000,
            max_lifetime_ms: 30 * 60 * 1000,
            acquire_timeout_ms: 10_000,
            lock_timeout_ms: 5_000,
            statement_timeout_ms: 5_000,
            transaction_timeout_ms: 5_000,
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
            compress_objects: true,
        }
    }
}

impl DbConfig {
    #[must_use]
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config in {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_open == 0 {
            return Err(Error::Config("max_open must be greater than zero".to_string()));
        }
        if self.acquire_timeout_ms == 0 || self.idle_timeout_ms == 0 || self.max_lifetime_ms == 0 {
            return Err(Error::Config(
                "pool timeouts must be greater than zero".to_string(),
            ));
        }
        if self.min_idle > self.max_open {
            return Err(Error::Config(
                "min_idle cannot exceed max_open".to_string(),
            ));
        }
        for scope in &self.scopes {
            if !is_valid_scope_name(scope) {
                return Err(Error::Config(format!("invalid scope name '{scope}'")));
            }
        }
        if !self.scopes.iter().any(|s| s == TENANT_SCOPE) {
            return Err(Error::Config(format!(
                "scopes must include '{TENANT_SCOPE}'"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[must_use]
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[must_use]
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    #[must_use]
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}
