//! Queue configuration
//!
//! `QueueConfig` names the queue and holds its retry, lease, and timing policy.

use std::time::Duration;

/// Configuration for one named job queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue name, part of every index key
    pub name: String,

    /// Prefix for every key this queue writes
    pub key_prefix: String,

    /// Interval between ticks of the background loop
    pub poll_interval: Duration,

    /// Lifetime of a job record past its scheduled time, reset on every write
    pub job_ttl: Duration,

    /// Attempts allowed when a job does not set its own limit
    pub default_max_attempts: u32,

    /// Retry delay is `backoff_base × 2^attempts`
    pub backoff_base: Duration,

    /// Upper bound for any retry delay
    pub max_backoff: Duration,

    /// Active jobs older than this are treated as a failed attempt
    pub lease_timeout: Option<Duration>,

    /// Cap on a single handler execution
    pub handler_timeout: Option<Duration>,

    /// How long `stop_processing` waits for the in-flight handler
    pub shutdown_grace: Duration,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_prefix: "queue".to_string(),
            poll_interval: Duration::from_millis(1000),
            job_ttl: Duration::from_secs(24 * 60 * 60),
            default_max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60 * 60),
            lease_timeout: Some(Duration::from_secs(5 * 60)),
            handler_timeout: None,
            shutdown_grace: Duration::from_secs(30),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_ttl(mut self, ttl: Duration) -> Self {
        self.job_ttl = ttl;
        self
    }

    pub fn with_default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.max_backoff = max;
        self
    }

    /// `None` disables stall recovery
    pub fn with_lease_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Delay before the next attempt, given how many attempts already ran
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::new("reminders");

        assert_eq!(config.name, "reminders");
        assert_eq!(config.key_prefix, "queue");
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.job_ttl, Duration::from_secs(86_400));
        assert_eq!(config.default_max_attempts, 3);
        assert_eq!(config.lease_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.handler_timeout, None);
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let config = QueueConfig::new("default");

        assert_eq!(config.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = QueueConfig::new("default")
            .with_backoff(Duration::from_secs(1), Duration::from_secs(10));

        assert_eq!(config.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(config.backoff_delay(4), Duration::from_secs(10));
        assert_eq!(config.backoff_delay(200), Duration::from_secs(10));
    }

    #[test]
    fn test_builder_pattern() {
        let config = QueueConfig::new("notifications")
            .with_key_prefix("test")
            .with_poll_interval(Duration::from_millis(500))
            .with_default_max_attempts(0)
            .with_handler_timeout(Some(Duration::from_secs(5)));

        assert_eq!(config.key_prefix, "test");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.default_max_attempts, 1);
        assert_eq!(config.handler_timeout, Some(Duration::from_secs(5)));
    }
}
