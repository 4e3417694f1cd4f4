use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing tenant id")]
    MissingTenantId,

    #[error("missing project id")]
    MissingProjectId,

    #[error("missing user context")]
    MissingUserContext,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid parent: {0}")]
    InvalidParent(String),

    #[error("invalid catalog")]
    InvalidCatalog,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("disallowed by policy")]
    DisallowedByPolicy,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("storage integrity check failed: {0}")]
    Integrity(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
