/// Unified error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Redis-specific errors
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Connection failed after retries
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Health check failed
    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic store error (wrong key type, poisoned lock, ...)
    #[error("Database error: {0}")]
    Generic(String),
}

impl DatabaseError {
    /// Whether the error means the store could not be reached at all
    pub fn is_connection_error(&self) -> bool {
        match self {
            #[cfg(feature = "redis")]
            DatabaseError::Redis(e) => e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error(),
            DatabaseError::ConnectionFailed(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;
