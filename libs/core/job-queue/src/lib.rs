//! Job Queue
//!
//! A priority/delayed job scheduler over the shared key-value store.
//!
//! ## Features
//!
//! - **Typed jobs**: `JobQueue<J>` dispatches a closed payload enum by its kind
//! - **Priorities and delays**: higher priority first, FIFO within a priority
//! - **Retry with backoff**: failed attempts wait `backoff_base × 2^attempts`
//! - **Atomic claim**: several processes may tick the same queue safely
//! - **Lease recovery**: jobs stalled in `active` are retried
//! - **Metrics**: `metrics` facade counters and histograms
//!
//! ## Example
//!
//! ```ignore
//! use job_queue::{handler_fn, JobOptions, JobQueue, QueueConfig};
//!
//! let queue = JobQueue::<EmailJob>::new(store, clock, QueueConfig::new("default"));
//! queue
//!     .register_handler(EmailJobKind::Send, handler_fn(|job| async move {
//!         send(&job.payload).await.map_err(JobError::handler)
//!     }))
//!     .await;
//!
//! let id = queue.add_job(EmailJob::Send { to }, JobOptions::new().with_priority(5)).await?;
//! queue.start_processing().await?;
//! ```

mod config;
mod error;
mod handler;
mod job;
mod keys;
pub mod metrics;
mod queue;
mod stats;

pub use config::QueueConfig;
pub use error::{JobError, QueueError, QueueResult};
pub use handler::{handler_fn, FnHandler, JobHandler, JobPayload};
pub use job::{Job, JobOptions, JobState};
pub use keys::QueueKeys;
pub use queue::{JobQueue, TickOutcome};
pub use stats::QueueStats;
