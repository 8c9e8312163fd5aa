use thiserror::Error;

/// Cache layer errors, mirroring `StorageError`'s shape so the same
/// `From`-conversions off the Postgres stack keep working unchanged.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Database connection error
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// Database query error
    #[error("Database query error: {0}")]
    QueryError(String),

    /// Database pool error
    #[error("Database pool error: {0}")]
    PoolError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Data not found
    #[error("Data not found: {0}")]
    NotFound(String),

    /// Schema error (migrations, DDL)
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio_postgres::Error> for CacheError {
    fn from(err: tokio_postgres::Error) -> Self {
        CacheError::QueryError(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for CacheError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        CacheError::PoolError(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CacheError {
    fn from(err: serde_yaml::Error) -> Self {
        CacheError::ConfigError(err.to_string())
    }
}

/// Result type for cache operations that must surface a hard failure (pool
/// construction, schema init). Day-to-day `get`/`put` I/O errors are instead
/// folded into [`CacheOutcome::Degraded`] — a cache failure should
/// never take down a backtest that could otherwise just recompute.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Outcome of a cache lookup-or-compute round trip: a hit returns
/// the stored value, a miss means the caller must compute it fresh (and
/// should `put` the result back), and a degraded outcome means the compute
/// path ran successfully but the cache itself failed on read or write — the
/// caller still has a usable value, just paired with a warning instead of a
/// silent success.
#[derive(Debug)]
pub enum CacheOutcome<T> {
    Hit(T),
    Miss,
    Degraded(T, CacheError),
}

impl<T> CacheOutcome<T> {
    /// Unwrap a hit or degraded value, discarding the distinction between
    /// "served from cache" and "cache failed but we have a value anyway".
    pub fn into_value(self) -> Option<T> {
        match self {
            CacheOutcome::Hit(v) | CacheOutcome::Degraded(v, _) => Some(v),
            CacheOutcome::Miss => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::Hit(_))
    }
}
