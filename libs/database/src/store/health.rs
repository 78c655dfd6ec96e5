use std::time::Instant;

use serde::Serialize;

use super::KeyValueStore;

/// Health check result for detailed status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,

    /// Error message when unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub response_time_ms: u64,
}

impl HealthStatus {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            healthy: true,
            message: None,
            response_time_ms,
        }
    }

    pub fn unhealthy(message: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
            response_time_ms,
        }
    }
}

/// Ping the store and time the round trip. Never fails; errors become an
/// unhealthy status.
pub async fn check_store_health(store: &dyn KeyValueStore) -> HealthStatus {
    let start = Instant::now();
    let result = store.ping().await;
    let elapsed = start.elapsed().as_millis() as u64;

    match result {
        Ok(()) => HealthStatus::healthy(elapsed),
        Err(e) => HealthStatus::unhealthy(e.to_string(), elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DatabaseError;
    use crate::store::{MemoryStore, MockKeyValueStore};

    #[test]
    fn test_health_status_healthy() {
        let status = HealthStatus::healthy(15);
        assert!(status.healthy);
        assert_eq!(status.response_time_ms, 15);
        assert!(status.message.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_is_healthy() {
        let status = check_store_health(&MemoryStore::new()).await;
        assert!(status.healthy);
    }

    #[tokio::test]
    async fn test_failed_ping_is_unhealthy() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_ping()
            .returning(|| Err(DatabaseError::ConnectionFailed("refused".to_string())));

        let status = check_store_health(&store).await;
        assert!(!status.healthy);
        assert!(status.message.unwrap().contains("refused"));
    }
}
