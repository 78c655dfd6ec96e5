//! Queue and job error types
//!
//! Two layers:
//! - **QueueError**: a queue operation failed (store unreachable, bad record)
//! - **JobError**: a single execution attempt failed; routed through the retry
//!   policy and never returned from the tick loop

use std::fmt::Display;
use std::time::Duration;

use database::DatabaseError;
use thiserror::Error;

/// Errors from queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    /// Store connection or command error
    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    /// Job record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `start_processing` called while the queue is already running
    #[error("Queue '{0}' is already processing")]
    AlreadyRunning(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Outcome of a failed execution attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// No handler registered for the job's kind
    #[error("No handler registered for job type '{kind}'")]
    HandlerNotFound { kind: String },

    /// The handler returned an error
    #[error("{0}")]
    Handler(String),

    /// The handler ran past the configured timeout
    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),
}

impl JobError {
    /// Wrap any displayable error as a handler failure
    pub fn handler(err: impl Display) -> Self {
        JobError::Handler(err.to_string())
    }
}
