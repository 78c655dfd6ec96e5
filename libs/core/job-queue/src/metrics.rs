//! Job queue metrics
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the binary.

use metrics::{counter, histogram};
use std::time::Duration;

/// Metrics helper labelled with the queue name
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    queue: String,
}

impl QueueMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    pub fn job_added(&self, job_type: &str) {
        counter!(
            "job_queue_jobs_added_total",
            "queue" => self.queue.clone(),
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    pub fn job_completed(&self, job_type: &str, duration: Duration) {
        self.job_processed(job_type, "completed");

        histogram!(
            "job_queue_job_duration_seconds",
            "queue" => self.queue.clone(),
            "job_type" => job_type.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_retried(&self, job_type: &str) {
        self.job_processed(job_type, "retried");
    }

    pub fn job_failed(&self, job_type: &str) {
        self.job_processed(job_type, "failed");
    }

    pub fn jobs_promoted(&self, count: u64) {
        if count > 0 {
            counter!("job_queue_jobs_promoted_total", "queue" => self.queue.clone())
                .increment(count);
        }
    }

    pub fn jobs_recovered(&self, count: u64) {
        if count > 0 {
            counter!("job_queue_jobs_recovered_total", "queue" => self.queue.clone())
                .increment(count);
        }
    }

    fn job_processed(&self, job_type: &str, status: &'static str) {
        counter!(
            "job_queue_jobs_processed_total",
            "queue" => self.queue.clone(),
            "job_type" => job_type.to_string(),
            "status" => status
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = QueueMetrics::new("default");
        metrics.job_added("send_email");
        metrics.job_completed("send_email", Duration::from_millis(12));
        metrics.jobs_promoted(0);
        assert_eq!(metrics.queue, "default");
    }
}
