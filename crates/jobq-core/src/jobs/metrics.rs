//! Queue metrics derived from the job collection

use serde::{Deserialize, Serialize};

use crate::jobs::job::{Job, JobState};

/// Aggregate queue metrics.
///
/// Latency is measured as `updated_at - created_at`, over completed
/// jobs only. With an empty store every derived value is zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Total jobs ever enqueued (terminal states included)
    pub total: usize,

    /// Jobs that finished successfully
    pub completed: usize,

    /// completed / total
    pub success_rate: f64,

    /// Average enqueue-to-completion latency in milliseconds
    pub avg_completion_latency_ms: u64,
}

impl QueueMetrics {
    /// Compute metrics over a snapshot of the collection
    pub fn from_jobs(jobs: &[Job]) -> Self {
        let total = jobs.len();
        if total == 0 {
            return Self::default();
        }

        let completed_jobs: Vec<&Job> = jobs
            .iter()
            .filter(|j| j.state == JobState::Completed)
            .collect();
        let completed = completed_jobs.len();

        let avg_completion_latency_ms = if completed > 0 {
            let total_ms: i64 = completed_jobs
                .iter()
                .map(|j| (j.updated_at - j.created_at).num_milliseconds().max(0))
                .sum();
            (total_ms / completed as i64) as u64
        } else {
            0
        };

        Self {
            total,
            completed,
            success_rate: completed as f64 / total as f64,
            avg_completion_latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::NewJob;
    use chrono::Duration;

    #[test]
    fn test_empty_store_is_all_zero() {
        let metrics = QueueMetrics::from_jobs(&[]);
        assert_eq!(metrics.total, 0);
        assert_eq!(metrics.completed, 0);
        assert_eq!(metrics.success_rate, 0.0);
        assert_eq!(metrics.avg_completion_latency_ms, 0);
    }

    #[test]
    fn test_success_rate_and_latency() {
        let mut done = NewJob::new("echo a").into_job(3).unwrap();
        done.mark_claimed("worker_1");
        done.mark_completed();
        // Pin the latency to exactly 4 seconds.
        done.updated_at = done.created_at + Duration::seconds(4);

        let pending = NewJob::new("echo b").into_job(3).unwrap();

        let metrics = QueueMetrics::from_jobs(&[done, pending]);
        assert_eq!(metrics.total, 2);
        assert_eq!(metrics.completed, 1);
        assert!((metrics.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.avg_completion_latency_ms, 4000);
    }

    #[test]
    fn test_no_completed_jobs_has_zero_latency() {
        let pending = NewJob::new("echo a").into_job(3).unwrap();
        let metrics = QueueMetrics::from_jobs(&[pending]);
        assert_eq!(metrics.completed, 0);
        assert_eq!(metrics.avg_completion_latency_ms, 0);
        assert_eq!(metrics.success_rate, 0.0);
    }
}
