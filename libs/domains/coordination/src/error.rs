use cache_store::CacheError;
use core_config::ConfigError;
use job_queue::QueueError;
use session_store::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Store unreachable at startup
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Coordinator is not initialized")]
    NotInitialized,
}

pub type CoordinationResult<T> = Result<T, CoordinationError>;
