//! The coordinator service.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cache_store::{CacheConfig, CacheStore};
use database::common::RetryConfig;
use database::redis::RedisStore;
use database::store::{check_store_health, HealthStatus};
use database::{SharedClock, SharedStore, SystemClock};
use job_queue::{JobPayload, JobQueue, QueueConfig, QueueError, QueueStats};
use session_store::{SessionConfig, SessionStore};
use strum::IntoEnumIterator;
use tracing::{debug, error, info, instrument, warn};

use crate::config::CoordinatorConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::handlers::CoordinationHandler;
use crate::health::{CoordinatorStats, HealthReport, QueueHealth};
use crate::jobs::{
    AlternativeVendorRecommendation, CoordinationJob, CoordinationJobKind, QueueName,
    ResponseReminder, VendorNotification,
};

const PROBE_TTL: Duration = Duration::from_secs(10);

/// Owns the session store, the cache, and the three job queues.
///
/// Construct one per process (or per test); nothing is global.
pub struct Coordinator {
    store: SharedStore,
    config: CoordinatorConfig,
    sessions: SessionStore,
    cache: CacheStore,
    default_queue: JobQueue<CoordinationJob>,
    notifications: JobQueue<CoordinationJob>,
    reminders: JobQueue<CoordinationJob>,
    initialized: AtomicBool,
}

impl Coordinator {
    pub fn new(store: SharedStore, clock: SharedClock, config: CoordinatorConfig) -> Self {
        let sessions = SessionStore::new(
            store.clone(),
            clock.clone(),
            SessionConfig::default().with_default_ttl(config.session_ttl),
        );
        let cache = CacheStore::new(
            store.clone(),
            CacheConfig::default().with_default_ttl(config.cache_ttl),
        );

        let queue = |name: QueueName, interval: Duration| {
            JobQueue::new(
                store.clone(),
                clock.clone(),
                QueueConfig::new(name.to_string()).with_poll_interval(interval),
            )
        };
        let default_queue = queue(QueueName::Default, config.default_interval);
        let notifications = queue(QueueName::Notifications, config.notifications_interval);
        let reminders = queue(QueueName::Reminders, config.reminders_interval);

        Self {
            store,
            config,
            sessions,
            cache,
            default_queue,
            notifications,
            reminders,
            initialized: AtomicBool::new(false),
        }
    }

    /// Connect to Redis with the default retry policy.
    ///
    /// An unreachable store is logged and returned as
    /// [`CoordinationError::Connection`].
    pub async fn connect(config: CoordinatorConfig) -> CoordinationResult<Self> {
        let store = RedisStore::connect(&config.redis, Some(RetryConfig::default()))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to connect to the store");
                CoordinationError::Connection(e.to_string())
            })?;

        Ok(Self::new(Arc::new(store), SystemClock::shared(), config))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn queue(&self, name: QueueName) -> &JobQueue<CoordinationJob> {
        match name {
            QueueName::Default => &self.default_queue,
            QueueName::Notifications => &self.notifications,
            QueueName::Reminders => &self.reminders,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Verify the store, register the domain handlers, and start every queue.
    ///
    /// Calling it again while initialized is a no-op.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> CoordinationResult<()> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Coordinator already initialized");
            return Ok(());
        }

        if let Err(e) = self.start().await {
            self.initialized.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!(
            default_ms = self.config.default_interval.as_millis() as u64,
            notifications_ms = self.config.notifications_interval.as_millis() as u64,
            reminders_ms = self.config.reminders_interval.as_millis() as u64,
            "Coordinator initialized"
        );
        Ok(())
    }

    async fn start(&self) -> CoordinationResult<()> {
        self.store.ping().await.map_err(|e| {
            error!(error = %e, "Store unreachable");
            CoordinationError::Connection(e.to_string())
        })?;

        let handler =
            CoordinationHandler::new(self.cache.clone(), self.config.notification_cache_ttl);
        for kind in CoordinationJobKind::iter() {
            self.queue(kind.queue())
                .register_handler(kind, handler.clone())
                .await;
        }

        for name in QueueName::iter() {
            match self.queue(name).start_processing().await {
                Ok(()) => {}
                Err(QueueError::AlreadyRunning(queue)) => {
                    warn!(queue = %queue, "Queue was already processing");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Stop every queue, letting in-flight jobs finish within their grace.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        tokio::join!(
            self.default_queue.stop_processing(),
            self.notifications.stop_processing(),
            self.reminders.stop_processing(),
        );
        self.initialized.store(false, Ordering::SeqCst);
        info!("Coordinator shut down");
    }

    /// Probe every subsystem. Failures degrade the report; this never errors.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthReport {
        let store = check_store_health(self.store.as_ref()).await;

        let start = Instant::now();
        let session = match self.sessions.get_session_stats().await {
            Ok(_) => HealthStatus::healthy(elapsed_ms(start)),
            Err(e) => HealthStatus::unhealthy(e.to_string(), elapsed_ms(start)),
        };

        let start = Instant::now();
        let cache = match self.probe_cache().await {
            Ok(true) => HealthStatus::healthy(elapsed_ms(start)),
            Ok(false) => HealthStatus::unhealthy("probe entry not readable", elapsed_ms(start)),
            Err(e) => HealthStatus::unhealthy(e.to_string(), elapsed_ms(start)),
        };

        let mut queues = BTreeMap::new();
        for name in QueueName::iter() {
            let queue = self.queue(name);
            let processing = queue.is_processing().await;
            let health = match queue.get_stats().await {
                Ok(stats) => QueueHealth {
                    processing,
                    stats: Some(stats),
                    error: None,
                },
                Err(e) => QueueHealth {
                    processing,
                    stats: None,
                    error: Some(e.to_string()),
                },
            };
            queues.insert(name.to_string(), health);
        }

        let report = HealthReport::new(store, session, cache, queues);
        if !report.is_healthy() {
            warn!(status = %report.status, "Coordinator health degraded");
        }
        report
    }

    /// Write, read back, and delete a short-lived entry
    async fn probe_cache(&self) -> cache_store::CacheResult<bool> {
        let probe = self.cache.with_namespace("health");
        probe.set("probe", &true, Some(PROBE_TTL)).await?;
        let readable = probe.exists("probe").await?;
        probe.delete("probe").await?;
        Ok(readable)
    }

    /// Aggregate counters of every subsystem
    pub async fn get_stats(&self) -> CoordinationResult<CoordinatorStats> {
        let sessions = self.sessions.get_session_stats().await?;
        let cache = self.cache.stats().await?;

        let mut queues: BTreeMap<String, QueueStats> = BTreeMap::new();
        for name in QueueName::iter() {
            queues.insert(name.to_string(), self.queue(name).get_stats().await?);
        }

        Ok(CoordinatorStats {
            sessions,
            cache,
            queues,
        })
    }

    /// Enqueue `job` on its kind's queue with its kind's priority.
    async fn enqueue(&self, job: CoordinationJob, delay: Duration) -> CoordinationResult<String> {
        if !self.is_initialized() {
            return Err(CoordinationError::NotInitialized);
        }

        let kind = job.kind();
        let id = self
            .queue(kind.queue())
            .add_job(job, kind.options().with_delay(delay))
            .await?;
        Ok(id)
    }

    #[instrument(skip(self, notification), fields(vendor_id = %notification.vendor_id, request_id = %notification.request_id))]
    pub async fn schedule_vendor_notification(
        &self,
        notification: VendorNotification,
    ) -> CoordinationResult<String> {
        self.enqueue(CoordinationJob::VendorNotification(notification), Duration::ZERO)
            .await
    }

    /// Schedule a reminder, by default after the configured reminder delay
    #[instrument(skip(self, reminder), fields(vendor_id = %reminder.vendor_id, request_id = %reminder.request_id))]
    pub async fn schedule_response_reminder(
        &self,
        reminder: ResponseReminder,
        delay: Option<Duration>,
    ) -> CoordinationResult<String> {
        let delay = delay.unwrap_or(self.config.response_reminder_delay);
        self.enqueue(CoordinationJob::ResponseReminder(reminder), delay)
            .await
    }

    #[instrument(skip(self, recommendation), fields(request_id = %recommendation.request_id))]
    pub async fn schedule_alternative_vendor_recommendation(
        &self,
        recommendation: AlternativeVendorRecommendation,
    ) -> CoordinationResult<String> {
        self.enqueue(
            CoordinationJob::AlternativeVendorRecommendation(recommendation),
            Duration::ZERO,
        )
        .await
    }

    /// Drop every cache entry carrying any of `tags`, in the background
    pub async fn schedule_cache_invalidation(
        &self,
        tags: Vec<String>,
    ) -> CoordinationResult<String> {
        self.enqueue(CoordinationJob::InvalidateCacheTags { tags }, Duration::ZERO)
            .await
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
