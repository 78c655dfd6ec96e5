//! Key layout of one queue
//!
//! ```text
//! {prefix}:{name}:waiting     sorted set, score = priority/readiness
//! {prefix}:{name}:delayed     sorted set, score = scheduled epoch ms
//! {prefix}:{name}:active      sorted set, score = dispatch epoch ms
//! {prefix}:{name}:completed   sorted set, score = completion epoch ms
//! {prefix}:{name}:failed      sorted set, score = failure epoch ms
//! {prefix}:{name}:job:{id}    JSON job record with TTL
//! ```

use strum::IntoEnumIterator;

use crate::job::JobState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    base: String,
}

impl QueueKeys {
    pub fn new(prefix: &str, name: &str) -> Self {
        Self {
            base: format!("{}:{}", prefix, name),
        }
    }

    /// Sorted-set key for a state index
    pub fn index(&self, state: JobState) -> String {
        format!("{}:{}", self.base, state)
    }

    /// All five index keys
    pub fn indices(&self) -> Vec<String> {
        JobState::iter().map(|state| self.index(state)).collect()
    }

    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.base, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = QueueKeys::new("queue", "reminders");

        assert_eq!(keys.index(JobState::Waiting), "queue:reminders:waiting");
        assert_eq!(keys.index(JobState::Failed), "queue:reminders:failed");
        assert_eq!(keys.job("abc"), "queue:reminders:job:abc");
        assert_eq!(keys.indices().len(), 5);
    }
}
