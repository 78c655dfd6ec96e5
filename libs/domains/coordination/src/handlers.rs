//! Handlers for [`CoordinationJob`]s.
//!
//! Each handler persists its result into the cache so request pages and
//! vendor dashboards can read it without touching the queues.

use std::time::Duration;

use async_trait::async_trait;
use cache_store::CacheStore;
use chrono::{DateTime, Utc};
use job_queue::{Job, JobError, JobHandler};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::jobs::{
    AlternativeVendorRecommendation, CoordinationJob, ResponseReminder, VendorNotification,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub job_id: String,
    pub request_id: String,
    pub vendor_id: String,
    pub title: String,
    pub message: String,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub job_id: String,
    pub request_id: String,
    pub vendor_id: String,
    pub client_id: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub job_id: String,
    pub request_id: String,
    pub client_id: String,
    pub declined_vendor_id: String,
    pub alternative_vendor_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

pub fn notification_key(vendor_id: &str, request_id: &str) -> String {
    format!("notifications:{}:{}", vendor_id, request_id)
}

pub fn reminder_key(request_id: &str, vendor_id: &str) -> String {
    format!("reminders:{}:{}", request_id, vendor_id)
}

pub fn recommendation_key(request_id: &str) -> String {
    format!("recommendations:{}", request_id)
}

pub fn vendor_tag(vendor_id: &str) -> String {
    format!("vendor:{}", vendor_id)
}

pub fn request_tag(request_id: &str) -> String {
    format!("request:{}", request_id)
}

/// Handles every [`CoordinationJob`] variant.
///
/// Registered once per kind on the queue that kind runs on.
#[derive(Clone)]
pub struct CoordinationHandler {
    cache: CacheStore,
    record_ttl: Duration,
}

impl CoordinationHandler {
    pub fn new(cache: CacheStore, record_ttl: Duration) -> Self {
        Self { cache, record_ttl }
    }

    /// Time the record was produced; the job's processing time when known
    fn stamp(job: &Job<CoordinationJob>) -> DateTime<Utc> {
        job.processed_at.unwrap_or_else(Utc::now)
    }

    async fn notify_vendor(
        &self,
        job: &Job<CoordinationJob>,
        notification: &VendorNotification,
    ) -> Result<(), JobError> {
        let record = NotificationRecord {
            job_id: job.id.clone(),
            request_id: notification.request_id.clone(),
            vendor_id: notification.vendor_id.clone(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            delivered_at: Self::stamp(job),
        };
        let tags = [
            vendor_tag(&notification.vendor_id),
            request_tag(&notification.request_id),
        ];

        self.cache
            .set_with_tags(
                &notification_key(&notification.vendor_id, &notification.request_id),
                &record,
                &[tags[0].as_str(), tags[1].as_str()],
                Some(self.record_ttl),
            )
            .await
            .map_err(JobError::handler)?;

        info!(
            job_id = %job.id,
            vendor_id = %notification.vendor_id,
            request_id = %notification.request_id,
            "Vendor notified"
        );
        Ok(())
    }

    async fn remind_vendor(
        &self,
        job: &Job<CoordinationJob>,
        reminder: &ResponseReminder,
    ) -> Result<(), JobError> {
        let record = ReminderRecord {
            job_id: job.id.clone(),
            request_id: reminder.request_id.clone(),
            vendor_id: reminder.vendor_id.clone(),
            client_id: reminder.client_id.clone(),
            sent_at: Self::stamp(job),
        };
        let tag = request_tag(&reminder.request_id);

        self.cache
            .set_with_tags(
                &reminder_key(&reminder.request_id, &reminder.vendor_id),
                &record,
                &[tag.as_str()],
                Some(self.record_ttl),
            )
            .await
            .map_err(JobError::handler)?;

        info!(
            job_id = %job.id,
            vendor_id = %reminder.vendor_id,
            request_id = %reminder.request_id,
            "Response reminder sent"
        );
        Ok(())
    }

    async fn recommend_alternatives(
        &self,
        job: &Job<CoordinationJob>,
        recommendation: &AlternativeVendorRecommendation,
    ) -> Result<(), JobError> {
        let record = RecommendationRecord {
            job_id: job.id.clone(),
            request_id: recommendation.request_id.clone(),
            client_id: recommendation.client_id.clone(),
            declined_vendor_id: recommendation.declined_vendor_id.clone(),
            alternative_vendor_ids: recommendation.alternative_vendor_ids.clone(),
            created_at: Self::stamp(job),
        };
        let tag = request_tag(&recommendation.request_id);

        self.cache
            .set_with_tags(
                &recommendation_key(&recommendation.request_id),
                &record,
                &[tag.as_str()],
                Some(self.record_ttl),
            )
            .await
            .map_err(JobError::handler)?;

        info!(
            job_id = %job.id,
            request_id = %recommendation.request_id,
            alternatives = recommendation.alternative_vendor_ids.len(),
            "Alternative vendors recommended"
        );
        Ok(())
    }

    async fn invalidate(&self, tags: &[String]) -> Result<(), JobError> {
        let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
        let removed = self
            .cache
            .invalidate_by_tags(&tags)
            .await
            .map_err(JobError::handler)?;
        debug!(removed, "Cache tags invalidated");
        Ok(())
    }
}

#[async_trait]
impl JobHandler<CoordinationJob> for CoordinationHandler {
    async fn handle(&self, job: &Job<CoordinationJob>) -> Result<(), JobError> {
        match &job.payload {
            CoordinationJob::VendorNotification(n) => self.notify_vendor(job, n).await,
            CoordinationJob::ResponseReminder(r) => self.remind_vendor(job, r).await,
            CoordinationJob::AlternativeVendorRecommendation(r) => {
                self.recommend_alternatives(job, r).await
            }
            CoordinationJob::InvalidateCacheTags { tags } => self.invalidate(tags).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_store::CacheConfig;
    use database::store::MockKeyValueStore;
    use database::{DatabaseError, MemoryStore};
    use job_queue::JobPayload;
    use std::sync::Arc;

    fn job(payload: CoordinationJob) -> Job<CoordinationJob> {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap_or_default();
        Job {
            id: "job-1".to_string(),
            job_type: payload.kind().to_string(),
            payload,
            priority: 0,
            attempts: 1,
            max_attempts: 3,
            delay_ms: 0,
            created_at: now,
            scheduled_for: now,
            processed_at: Some(now),
            completed_at: None,
            failed_at: None,
            error: None,
        }
    }

    fn handler() -> (CoordinationHandler, CacheStore) {
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), CacheConfig::default());
        (
            CoordinationHandler::new(cache.clone(), Duration::from_secs(60)),
            cache,
        )
    }

    fn notification() -> VendorNotification {
        VendorNotification {
            request_id: "req-1".to_string(),
            vendor_id: "ven-1".to_string(),
            title: "New request".to_string(),
            message: "Quote requested".to_string(),
        }
    }

    #[tokio::test]
    async fn test_notification_is_cached() {
        let (handler, cache) = handler();
        let job = job(CoordinationJob::VendorNotification(notification()));

        handler.handle(&job).await.unwrap();

        let record: NotificationRecord = cache
            .get(&notification_key("ven-1", "req-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.job_id, "job-1");
        assert_eq!(record.title, "New request");
        assert_eq!(record.delivered_at, job.processed_at.unwrap());
    }

    #[tokio::test]
    async fn test_vendor_tag_invalidates_notification() {
        let (handler, cache) = handler();
        handler
            .handle(&job(CoordinationJob::VendorNotification(notification())))
            .await
            .unwrap();

        handler
            .handle(&job(CoordinationJob::InvalidateCacheTags {
                tags: vec![vendor_tag("ven-1")],
            }))
            .await
            .unwrap();

        assert!(!cache.exists(&notification_key("ven-1", "req-1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_request_tag_covers_reminders_and_recommendations() {
        let (handler, cache) = handler();
        handler
            .handle(&job(CoordinationJob::ResponseReminder(ResponseReminder {
                request_id: "req-1".into(),
                vendor_id: "ven-1".into(),
                client_id: "cli-1".into(),
            })))
            .await
            .unwrap();
        handler
            .handle(&job(CoordinationJob::AlternativeVendorRecommendation(
                AlternativeVendorRecommendation {
                    request_id: "req-1".into(),
                    client_id: "cli-1".into(),
                    declined_vendor_id: "ven-1".into(),
                    alternative_vendor_ids: vec!["ven-2".into(), "ven-3".into()],
                },
            )))
            .await
            .unwrap();

        let record: RecommendationRecord = cache
            .get(&recommendation_key("req-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.alternative_vendor_ids, vec!["ven-2", "ven-3"]);

        let removed = cache.invalidate_by_tags(&["request:req-1"]).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!cache.exists(&reminder_key("req-1", "ven-1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_failure_is_a_handler_error() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_set()
            .returning(|_, _, _| Err(DatabaseError::ConnectionFailed("refused".into())));
        let cache = CacheStore::new(Arc::new(mock), CacheConfig::default());
        let handler = CoordinationHandler::new(cache, Duration::from_secs(60));

        let err = handler
            .handle(&job(CoordinationJob::VendorNotification(notification())))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Handler(ref msg) if msg.contains("refused")));
    }
}
