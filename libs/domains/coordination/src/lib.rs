//! Coordination Domain
//!
//! Background coordination for vendor requests: one session store, one cache,
//! and three job queues sharing a key-value store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Coordinator                  │  ← init/shutdown, health, stats
//! └──┬──────────────┬──────────────┬─────────────┘
//!    │              │              │
//! ┌──▼─────────┐ ┌──▼─────────┐ ┌──▼──────────────────────────────┐
//! │  Sessions  │ │   Cache    │ │ Queues: default │ notifications │
//! │            │ │            │ │         reminders               │
//! └──┬─────────┘ └──▲──┬──────┘ └──┬──────────────────────────────┘
//!    │              │  │           │ handlers persist results ──┘
//! ┌──▼──────────────┴──▼───────────▼─┐
//! │        KeyValueStore (Redis)     │
//! └──────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use core_config::FromEnv;
//! use domain_coordination::{Coordinator, CoordinatorConfig, VendorNotification};
//!
//! let coordinator = Coordinator::connect(CoordinatorConfig::from_env()?).await?;
//! coordinator.initialize().await?;
//!
//! coordinator
//!     .schedule_vendor_notification(VendorNotification {
//!         request_id: "req-1".into(),
//!         vendor_id: "vendor-9".into(),
//!         title: "New request".into(),
//!         message: "A client asked for a quote".into(),
//!     })
//!     .await?;
//!
//! coordinator.shutdown().await;
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod health;
pub mod jobs;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{CoordinationError, CoordinationResult};
pub use handlers::{
    CoordinationHandler, NotificationRecord, RecommendationRecord, ReminderRecord,
};
pub use health::{CoordinatorStats, HealthReport, HealthState, QueueHealth};
pub use jobs::{
    AlternativeVendorRecommendation, CoordinationJob, CoordinationJobKind, QueueName,
    ResponseReminder, VendorNotification,
};
