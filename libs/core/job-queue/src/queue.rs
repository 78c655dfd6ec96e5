//! The generic JobQueue.
//!
//! Each tick:
//! 1. active jobs past their lease are routed through the failure policy
//! 2. due delayed jobs are promoted to waiting
//! 3. the highest-priority waiting job is claimed into active and executed
//!
//! Claiming is a single atomic pop-and-move and every later transition is an
//! atomic conditional move, so a job id is in exactly one index even when
//! several processes tick the same queue.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use database::{SharedClock, SharedStore};
use futures::FutureExt;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{JobError, QueueError, QueueResult};
use crate::handler::{JobHandler, JobPayload};
use crate::job::{waiting_score, Job, JobOptions, JobState, MAX_PRIORITY};
use crate::keys::QueueKeys;
use crate::metrics::QueueMetrics;
use crate::stats::QueueStats;

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was ready
    Idle,
    Completed { job_id: String },
    /// The attempt failed and the job is delayed by `delay`
    Retried { job_id: String, delay: Duration },
    /// The attempt failed and no attempts remain
    Failed { job_id: String },
    /// The claimed id had no readable record, or another process moved it
    Dropped { job_id: String },
}

type HandlerMap<J> = HashMap<<J as JobPayload>::Kind, Arc<dyn JobHandler<J>>>;

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner<J: JobPayload> {
    store: SharedStore,
    clock: SharedClock,
    config: QueueConfig,
    keys: QueueKeys,
    metrics: QueueMetrics,
    handlers: RwLock<HandlerMap<J>>,
    worker: Mutex<Option<Worker>>,
}

/// Named priority/delayed job queue.
///
/// Cloning is cheap and every clone drives the same queue. A queue that was
/// started keeps its background task alive until
/// [`stop_processing`](Self::stop_processing) is called.
pub struct JobQueue<J: JobPayload> {
    inner: Arc<Inner<J>>,
}

impl<J: JobPayload> Clone for JobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn at_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl<J: JobPayload> JobQueue<J> {
    pub fn new(store: SharedStore, clock: SharedClock, config: QueueConfig) -> Self {
        let keys = QueueKeys::new(&config.key_prefix, &config.name);
        let metrics = QueueMetrics::new(config.name.clone());

        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                config,
                keys,
                metrics,
                handlers: RwLock::new(HashMap::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.inner.keys
    }

    /// Persist a job and index it as waiting, or as delayed when `options.delay > 0`.
    ///
    /// Returns the job id as soon as the job is stored; outcomes are observed
    /// through [`get_job`](Self::get_job) and [`get_stats`](Self::get_stats).
    #[instrument(skip(self, payload, options), fields(queue = %self.inner.config.name, job_type = %payload.kind()))]
    pub async fn add_job(&self, payload: J, options: JobOptions) -> QueueResult<String> {
        let inner = &self.inner;
        let now_ms = inner.clock.now_millis();
        let delay_ms = millis(options.delay);
        let ready_ms = now_ms.saturating_add(delay_ms);

        let job = Job {
            id: Uuid::now_v7().to_string(),
            job_type: payload.kind().to_string(),
            payload,
            priority: options.priority.clamp(-MAX_PRIORITY, MAX_PRIORITY),
            attempts: 0,
            max_attempts: options
                .max_attempts
                .unwrap_or(inner.config.default_max_attempts),
            delay_ms: delay_ms as u64,
            created_at: at_millis(now_ms),
            scheduled_for: at_millis(ready_ms),
            processed_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
        };

        // Record first, so a claimed id always has something to load
        self.save(&job).await?;

        if delay_ms > 0 {
            inner
                .store
                .zadd(&inner.keys.index(JobState::Delayed), &job.id, ready_ms as f64)
                .await?;
        } else {
            inner
                .store
                .zadd(
                    &inner.keys.index(JobState::Waiting),
                    &job.id,
                    waiting_score(job.priority, now_ms),
                )
                .await?;
        }

        inner.metrics.job_added(&job.job_type);
        info!(job_id = %job.id, priority = job.priority, delay_ms, "Job added");
        Ok(job.id)
    }

    /// Associate a handler with a job kind, replacing any previous one.
    pub async fn register_handler<H>(&self, kind: J::Kind, handler: H)
    where
        H: JobHandler<J> + 'static,
    {
        self.inner
            .handlers
            .write()
            .await
            .insert(kind, Arc::new(handler));
        debug!(queue = %self.inner.config.name, job_type = %kind, "Handler registered");
    }

    /// Fetch a job record by id
    pub async fn get_job(&self, job_id: &str) -> QueueResult<Option<Job<J>>> {
        let raw = self.inner.store.get(&self.inner.keys.job(job_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Run one tick: recover stalled jobs, promote due ones, execute at most one.
    #[instrument(skip(self), fields(queue = %self.inner.config.name))]
    pub async fn process_next(&self) -> QueueResult<TickOutcome> {
        let inner = &self.inner;

        self.recover_stalled().await?;
        self.promote_delayed().await?;

        let now_ms = inner.clock.now_millis();
        let claimed = inner
            .store
            .zpop_min_move(
                &inner.keys.index(JobState::Waiting),
                &inner.keys.index(JobState::Active),
                now_ms as f64,
            )
            .await?;
        let Some(job_id) = claimed else {
            return Ok(TickOutcome::Idle);
        };

        let Some(mut job) = self.load_indexed(&job_id, JobState::Active).await? else {
            return Ok(TickOutcome::Dropped { job_id });
        };

        job.attempts += 1;
        job.processed_at = Some(at_millis(now_ms));
        self.save(&job).await?;

        let started = Instant::now();
        match self.execute(&job).await {
            Ok(()) => self.complete(job, started.elapsed()).await,
            Err(e) => self.fail_attempt(job, e.to_string()).await,
        }
    }

    async fn execute(&self, job: &Job<J>) -> Result<(), JobError> {
        let kind = job.payload.kind();
        let handler = self.inner.handlers.read().await.get(&kind).cloned();
        let Some(handler) = handler else {
            return Err(JobError::HandlerNotFound {
                kind: kind.to_string(),
            });
        };

        debug!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts, "Executing job");

        let run = AssertUnwindSafe(handler.handle(job)).catch_unwind();
        let result = match self.inner.config.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => return Err(JobError::Timeout(limit)),
            },
            None => run.await,
        };

        result.unwrap_or_else(|_| Err(JobError::Handler("handler panicked".to_string())))
    }

    async fn complete(&self, mut job: Job<J>, elapsed: Duration) -> QueueResult<TickOutcome> {
        let inner = &self.inner;
        let now_ms = inner.clock.now_millis();

        if !self
            .transition(&job.id, JobState::Active, JobState::Completed, now_ms as f64)
            .await?
        {
            return Ok(self.lost_lease(job.id));
        }

        job.completed_at = Some(at_millis(now_ms));
        job.error = None;
        self.save(&job).await?;

        inner.metrics.job_completed(&job.job_type, elapsed);
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            duration_ms = elapsed.as_millis() as u64,
            "Job completed"
        );
        Ok(TickOutcome::Completed { job_id: job.id })
    }

    /// Route a failed attempt to `failed` or back to `delayed` with backoff.
    async fn fail_attempt(&self, mut job: Job<J>, reason: String) -> QueueResult<TickOutcome> {
        let inner = &self.inner;
        let now_ms = inner.clock.now_millis();
        job.error = Some(reason);

        if job.attempts_exhausted() {
            if !self
                .transition(&job.id, JobState::Active, JobState::Failed, now_ms as f64)
                .await?
            {
                return Ok(self.lost_lease(job.id));
            }

            job.failed_at = Some(at_millis(now_ms));
            self.save(&job).await?;

            inner.metrics.job_failed(&job.job_type);
            error!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                error = job.error.as_deref().unwrap_or_default(),
                "Job failed, no attempts left"
            );
            return Ok(TickOutcome::Failed { job_id: job.id });
        }

        let delay = inner.config.backoff_delay(job.attempts);
        let ready_ms = now_ms.saturating_add(millis(delay));
        if !self
            .transition(&job.id, JobState::Active, JobState::Delayed, ready_ms as f64)
            .await?
        {
            return Ok(self.lost_lease(job.id));
        }

        job.scheduled_for = at_millis(ready_ms);
        self.save(&job).await?;

        inner.metrics.job_retried(&job.job_type);
        warn!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = job.error.as_deref().unwrap_or_default(),
            "Job attempt failed, retry scheduled"
        );
        Ok(TickOutcome::Retried {
            job_id: job.id,
            delay,
        })
    }

    fn lost_lease(&self, job_id: String) -> TickOutcome {
        warn!(
            queue = %self.inner.config.name,
            job_id = %job_id,
            "Job left the active index while running, outcome discarded"
        );
        TickOutcome::Dropped { job_id }
    }

    /// Treat active jobs older than the lease as failed attempts.
    async fn recover_stalled(&self) -> QueueResult<u64> {
        let inner = &self.inner;
        let Some(lease) = inner.config.lease_timeout else {
            return Ok(0);
        };

        let cutoff = inner.clock.now_millis().saturating_sub(millis(lease));
        let stalled = inner
            .store
            .zrange_by_score(
                &inner.keys.index(JobState::Active),
                f64::NEG_INFINITY,
                cutoff as f64,
            )
            .await?;

        let mut recovered = 0;
        for job_id in stalled {
            if let Some(job) = self.load_indexed(&job_id, JobState::Active).await? {
                warn!(job_id = %job.id, attempt = job.attempts, "Lease expired, recovering job");
                self.fail_attempt(job, "lease expired".to_string()).await?;
                recovered += 1;
            }
        }

        inner.metrics.jobs_recovered(recovered);
        Ok(recovered)
    }

    /// Move every delayed job whose time has come into waiting.
    async fn promote_delayed(&self) -> QueueResult<u64> {
        let inner = &self.inner;
        let now_ms = inner.clock.now_millis();
        let due = inner
            .store
            .zrange_by_score(
                &inner.keys.index(JobState::Delayed),
                f64::NEG_INFINITY,
                now_ms as f64,
            )
            .await?;

        let mut promoted = 0;
        for job_id in due {
            let Some(job) = self.load_indexed(&job_id, JobState::Delayed).await? else {
                continue;
            };
            let score = waiting_score(job.priority, job.scheduled_for.timestamp_millis());
            if self
                .transition(&job_id, JobState::Delayed, JobState::Waiting, score)
                .await?
            {
                debug!(job_id = %job_id, "Promoted delayed job");
                promoted += 1;
            }
        }

        inner.metrics.jobs_promoted(promoted);
        Ok(promoted)
    }

    /// Load the record of an id found in `state`, unindexing it when the record
    /// is gone or unreadable.
    async fn load_indexed(&self, job_id: &str, state: JobState) -> QueueResult<Option<Job<J>>> {
        let inner = &self.inner;
        let reason = match self.get_job(job_id).await {
            Ok(Some(job)) => return Ok(Some(job)),
            Ok(None) => "record expired".to_string(),
            Err(QueueError::Serialization(e)) => {
                inner.store.del(&[inner.keys.job(job_id)]).await?;
                format!("malformed record: {}", e)
            }
            Err(e) => return Err(e),
        };

        warn!(
            queue = %inner.config.name,
            job_id,
            state = %state,
            reason = %reason,
            "Dropping job id"
        );
        inner.store.zrem(&inner.keys.index(state), job_id).await?;
        Ok(None)
    }

    async fn transition(
        &self,
        job_id: &str,
        from: JobState,
        to: JobState,
        score: f64,
    ) -> QueueResult<bool> {
        let keys = &self.inner.keys;
        let moved = self
            .inner
            .store
            .zmove(&keys.index(from), &keys.index(to), job_id, score)
            .await?;
        Ok(moved)
    }

    /// Write the record with a lifetime of `job_ttl` past its scheduled time,
    /// so a delayed job keeps its record until it is due and beyond.
    async fn save(&self, job: &Job<J>) -> QueueResult<()> {
        let inner = &self.inner;
        let raw = serde_json::to_string(job)?;
        let pending_ms = job
            .scheduled_for
            .timestamp_millis()
            .saturating_sub(inner.clock.now_millis())
            .max(0);
        let ttl = inner
            .config
            .job_ttl
            .saturating_add(Duration::from_millis(pending_ms as u64));

        inner
            .store
            .set(&inner.keys.job(&job.id), &raw, Some(ttl))
            .await?;
        Ok(())
    }

    /// Cardinality of each index
    pub async fn get_stats(&self) -> QueueResult<QueueStats> {
        let store = &self.inner.store;
        let keys = &self.inner.keys;

        Ok(QueueStats {
            waiting: store.zcard(&keys.index(JobState::Waiting)).await?,
            active: store.zcard(&keys.index(JobState::Active)).await?,
            completed: store.zcard(&keys.index(JobState::Completed)).await?,
            failed: store.zcard(&keys.index(JobState::Failed)).await?,
            delayed: store.zcard(&keys.index(JobState::Delayed)).await?,
        })
    }

    /// Remove a job from every index and delete its record.
    ///
    /// Returns false if nothing referenced the id.
    #[instrument(skip(self), fields(queue = %self.inner.config.name))]
    pub async fn remove_job(&self, job_id: &str) -> QueueResult<bool> {
        let store = &self.inner.store;
        let mut removed = false;

        for index in self.inner.keys.indices() {
            removed |= store.zrem(&index, job_id).await?;
        }
        removed |= store.del(&[self.inner.keys.job(job_id)]).await? > 0;

        if removed {
            info!(job_id, "Job removed");
        }
        Ok(removed)
    }

    /// Purge completed jobs that finished more than `older_than` ago.
    pub async fn cleanup_completed_jobs(&self, older_than: Duration) -> QueueResult<u64> {
        self.cleanup(JobState::Completed, older_than).await
    }

    /// Purge failed jobs that failed more than `older_than` ago.
    pub async fn cleanup_failed_jobs(&self, older_than: Duration) -> QueueResult<u64> {
        self.cleanup(JobState::Failed, older_than).await
    }

    #[instrument(skip(self), fields(queue = %self.inner.config.name))]
    async fn cleanup(&self, state: JobState, older_than: Duration) -> QueueResult<u64> {
        let inner = &self.inner;
        let index = inner.keys.index(state);
        let cutoff = inner.clock.now_millis().saturating_sub(millis(older_than));

        let expired = inner
            .store
            .zrange_by_score(&index, f64::NEG_INFINITY, cutoff as f64)
            .await?;

        let mut removed = 0;
        for job_id in &expired {
            if inner.store.zrem(&index, job_id).await? {
                removed += 1;
            }
        }

        if !expired.is_empty() {
            let records: Vec<String> = expired.iter().map(|id| inner.keys.job(id)).collect();
            inner.store.del(&records).await?;
            info!(removed, "Cleaned up terminal jobs");
        }
        Ok(removed)
    }

    /// Start the background tick at the configured poll interval.
    pub async fn start_processing(&self) -> QueueResult<()> {
        self.start_processing_every(self.inner.config.poll_interval)
            .await
    }

    /// Start the background tick at `interval`.
    pub async fn start_processing_every(&self, interval: Duration) -> QueueResult<()> {
        let mut worker = self.inner.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Err(QueueError::AlreadyRunning(self.inner.config.name.clone()));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let queue = self.clone();
        let handle = tokio::spawn(async move { queue.run(interval, shutdown_rx).await });
        *worker = Some(Worker { shutdown, handle });

        info!(
            queue = %self.inner.config.name,
            interval_ms = interval.as_millis() as u64,
            "Started processing"
        );
        Ok(())
    }

    async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                // Any change, or a dropped sender, means stop
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            match self.process_next().await {
                Ok(_) => {
                    if consecutive_errors > 0 {
                        info!(
                            queue = %self.inner.config.name,
                            consecutive_errors,
                            "Queue tick recovered"
                        );
                        consecutive_errors = 0;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(
                        queue = %self.inner.config.name,
                        consecutive_errors,
                        error = %e,
                        "Queue tick failed"
                    );
                }
            }
        }

        info!(queue = %self.inner.config.name, "Processing loop stopped");
    }

    /// Stop scheduling ticks.
    ///
    /// A job already executing is never interrupted: this waits up to
    /// `shutdown_grace` for it and then detaches the task, which still
    /// finishes the job before exiting.
    pub async fn stop_processing(&self) {
        let Some(worker) = self.inner.worker.lock().await.take() else {
            return;
        };

        let _ = worker.shutdown.send(true);
        let grace = self.inner.config.shutdown_grace;

        match tokio::time::timeout(grace, worker.handle).await {
            Ok(Ok(())) => info!(queue = %self.inner.config.name, "Stopped processing"),
            Ok(Err(e)) => error!(
                queue = %self.inner.config.name,
                error = %e,
                "Processing task ended abnormally"
            ),
            Err(_) => warn!(
                queue = %self.inner.config.name,
                grace_ms = grace.as_millis() as u64,
                "Job still running after shutdown grace, detaching"
            ),
        }
    }

    /// Whether the background task is running
    pub async fn is_processing(&self) -> bool {
        self.inner
            .worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }
}
