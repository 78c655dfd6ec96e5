//! Job record and per-job options

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

/// Highest accepted priority magnitude; values outside are clamped.
pub const MAX_PRIORITY: i32 = 1024;

/// The five mutually exclusive indices a job id can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

/// Persisted job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job<J> {
    pub id: String,
    /// Display form of the payload's kind
    pub job_type: String,
    pub payload: J,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl<J> Job<J> {
    /// Whether another failed attempt would be final
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Options for [`add_job`](crate::JobQueue::add_job)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Higher runs sooner
    pub priority: i32,
    /// Falls back to the queue's `default_max_attempts`
    pub max_attempts: Option<u32>,
    /// Zero means ready immediately
    pub delay: Duration,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Score of a ready job in the waiting index.
///
/// Priority dominates (2^42 ms is roughly 139 years), readiness time breaks
/// ties, and the store orders equal scores by id. With priorities clamped to
/// ±1024 the result stays below 2^53, so it is exact as an `f64`.
pub(crate) fn waiting_score(priority: i32, ready_at_ms: i64) -> f64 {
    const PRIORITY_WEIGHT: i64 = 1 << 42;
    let priority = i64::from(priority.clamp(-MAX_PRIORITY, MAX_PRIORITY));
    (ready_at_ms - priority * PRIORITY_WEIGHT) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_priority_scores_lower() {
        let now = 1_700_000_000_000;
        assert!(waiting_score(10, now) < waiting_score(5, now));
        assert!(waiting_score(0, now) < waiting_score(-1, now));
    }

    #[test]
    fn test_priority_beats_readiness() {
        let now = 1_700_000_000_000;
        let a_day_later = now + 86_400_000;
        assert!(waiting_score(1, a_day_later) < waiting_score(0, now));
    }

    #[test]
    fn test_fifo_within_priority() {
        assert!(waiting_score(5, 1_000) < waiting_score(5, 1_001));
    }

    #[test]
    fn test_priority_is_clamped() {
        assert_eq!(waiting_score(5_000, 0), waiting_score(MAX_PRIORITY, 0));
        assert_eq!(waiting_score(i32::MIN, 0), waiting_score(-MAX_PRIORITY, 0));
    }

    #[test]
    fn test_job_options_builder() {
        let options = JobOptions::new()
            .with_priority(5)
            .with_max_attempts(0)
            .with_delay(Duration::from_secs(2));

        assert_eq!(options.priority, 5);
        assert_eq!(options.max_attempts, Some(1));
        assert_eq!(options.delay, Duration::from_secs(2));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(JobState::Waiting.as_ref(), "waiting");
        assert_eq!(JobState::Completed.to_string(), "completed");
    }
}
