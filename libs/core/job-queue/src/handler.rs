//! Job payload and handler traits.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::JobError;
use crate::job::Job;

/// Trait for job payloads.
///
/// A payload is a closed enum; `Kind` is its fieldless discriminant, which
/// doubles as the handler registry key and the stored `job_type`.
///
/// # Example
///
/// ```rust,ignore
/// use job_queue::JobPayload;
/// use strum::EnumDiscriminants;
///
/// #[derive(Debug, Clone, Serialize, Deserialize, EnumDiscriminants)]
/// #[strum_discriminants(name(EmailJobKind), derive(Hash, strum::Display))]
/// enum EmailJob {
///     Send { to: String },
/// }
///
/// impl JobPayload for EmailJob {
///     type Kind = EmailJobKind;
///
///     fn kind(&self) -> EmailJobKind {
///         self.into()
///     }
/// }
/// ```
pub trait JobPayload: Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Display + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Trait for job handlers.
///
/// Return `Ok(())` for success. An `Err` counts as a failed attempt and is
/// retried or moved to `failed` depending on the job's remaining attempts.
#[async_trait]
pub trait JobHandler<J: JobPayload>: Send + Sync {
    async fn handle(&self, job: &Job<J>) -> Result<(), JobError>;
}

/// Handler built from an async closure, see [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure taking the job by value as a [`JobHandler`].
///
/// ```rust,ignore
/// queue
///     .register_handler(EmailJobKind::Send, handler_fn(|job: Job<EmailJob>| async move {
///         println!("sending {:?}", job.payload);
///         Ok(())
///     }))
///     .await;
/// ```
pub fn handler_fn<J, F, Fut>(f: F) -> FnHandler<F>
where
    J: JobPayload,
    F: Fn(Job<J>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<J, F, Fut> JobHandler<J> for FnHandler<F>
where
    J: JobPayload,
    F: Fn(Job<J>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send,
{
    async fn handle(&self, job: &Job<J>) -> Result<(), JobError> {
        (self.f)(job.clone()).await
    }
}
