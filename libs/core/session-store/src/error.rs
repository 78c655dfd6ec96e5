use database::DatabaseError;
use thiserror::Error;

/// A missing or malformed session is not an error; see [`SessionStore`](crate::SessionStore).
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;
