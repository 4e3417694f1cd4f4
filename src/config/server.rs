use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::DbConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub db: DbConfig,
    /// Allowed clock skew for signed tangent requests, in seconds.
    pub signature_skew_secs: u64,
    /// Filter used when RUST_LOG is not set.
    pub log_filter: String,
}

impl ServerConfig {
    #[must_use]
    pub fn signature_skew(&self) -> Duration {
        Duration::from_secs(self.signature_skew_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            signature_skew_secs: 5 * 60,
            log_filter: "skillvault=info".to_string(),
        }
    }
}
