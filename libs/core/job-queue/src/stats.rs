use serde::Serialize;

/// Cardinality of each index of a queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl QueueStats {
    /// Jobs not yet in a terminal state
    pub fn pending(&self) -> u64 {
        self.waiting + self.active + self.delayed
    }
}
