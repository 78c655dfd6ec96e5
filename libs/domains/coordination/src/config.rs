use std::time::Duration;

use core_config::redis::RedisConfig;
use core_config::{env_parse_or, ConfigError, FromEnv};

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub redis: RedisConfig,
    /// Tick interval of the `default` queue
    pub default_interval: Duration,
    /// Tick interval of the `notifications` queue
    pub notifications_interval: Duration,
    /// Tick interval of the `reminders` queue
    pub reminders_interval: Duration,
    pub session_ttl: Duration,
    pub cache_ttl: Duration,
    /// How long after scheduling a response reminder fires
    pub response_reminder_delay: Duration,
    /// Lifetime of the records handlers write into the cache
    pub notification_cache_ttl: Duration,
}

impl CoordinatorConfig {
    pub fn new(redis: RedisConfig) -> Self {
        Self {
            redis,
            default_interval: Duration::from_millis(1000),
            notifications_interval: Duration::from_millis(500),
            reminders_interval: Duration::from_millis(2000),
            session_ttl: Duration::from_secs(86_400),
            cache_ttl: Duration::from_secs(3600),
            response_reminder_delay: Duration::from_secs(86_400),
            notification_cache_ttl: Duration::from_secs(604_800),
        }
    }

    /// Set all three queue intervals at once
    pub fn with_queue_intervals(
        mut self,
        default: Duration,
        notifications: Duration,
        reminders: Duration,
    ) -> Self {
        self.default_interval = default;
        self.notifications_interval = notifications;
        self.reminders_interval = reminders;
        self
    }

    pub fn with_response_reminder_delay(mut self, delay: Duration) -> Self {
        self.response_reminder_delay = delay;
        self
    }

    pub fn with_notification_cache_ttl(mut self, ttl: Duration) -> Self {
        self.notification_cache_ttl = ttl;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new(RedisConfig::new("redis://127.0.0.1:6379".to_string()))
    }
}

fn millis(key: &str, default: u64) -> Result<Duration, ConfigError> {
    env_parse_or(key, default).map(Duration::from_millis)
}

fn secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    env_parse_or(key, default).map(Duration::from_secs)
}

impl FromEnv for CoordinatorConfig {
    /// Requires REDIS_URL (or REDIS_HOST); everything else has a default
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            redis: RedisConfig::from_env()?,
            default_interval: millis("QUEUE_DEFAULT_INTERVAL_MS", 1000)?,
            notifications_interval: millis("QUEUE_NOTIFICATIONS_INTERVAL_MS", 500)?,
            reminders_interval: millis("QUEUE_REMINDERS_INTERVAL_MS", 2000)?,
            session_ttl: secs("SESSION_TTL_SECS", 86_400)?,
            cache_ttl: secs("CACHE_TTL_SECS", 3600)?,
            response_reminder_delay: secs("RESPONSE_REMINDER_DELAY_SECS", 86_400)?,
            notification_cache_ttl: secs("NOTIFICATION_CACHE_TTL_SECS", 604_800)?,
        })
    }
}
