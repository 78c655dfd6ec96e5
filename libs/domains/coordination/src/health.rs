use std::collections::BTreeMap;

use cache_store::CacheStats;
use database::store::HealthStatus;
use job_queue::QueueStats;
use serde::Serialize;
use session_store::SessionStats;
use strum::{AsRefStr, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
}

/// Probe result for one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    pub processing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<QueueStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueHealth {
    pub fn healthy(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of [`Coordinator::health_check`](crate::Coordinator::health_check)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub store: HealthStatus,
    pub session: HealthStatus,
    pub cache: HealthStatus,
    pub queues: BTreeMap<String, QueueHealth>,
}

impl HealthReport {
    pub(crate) fn new(
        store: HealthStatus,
        session: HealthStatus,
        cache: HealthStatus,
        queues: BTreeMap<String, QueueHealth>,
    ) -> Self {
        let healthy = store.healthy
            && session.healthy
            && cache.healthy
            && queues.values().all(QueueHealth::healthy);

        Self {
            status: if healthy {
                HealthState::Healthy
            } else {
                HealthState::Degraded
            },
            store,
            session,
            cache,
            queues,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Aggregate of every subsystem's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorStats {
    pub sessions: SessionStats,
    pub cache: CacheStats,
    pub queues: BTreeMap<String, QueueStats>,
}
