pub mod config;
pub mod error;
pub mod jobs;

// Re-export commonly used types
pub use config::{resolve_data_dir, QueueConfig, KEY_BACKOFF_BASE, KEY_MAX_RETRIES};
pub use error::{Error, Result};
pub use jobs::{
    BackoffPolicy, ExecutionError, ExecutionOutput, Job, JobExecutor, JobState, JobStore,
    NewJob, QueueMetrics, RetryDecision, ShellRunner, ShutdownReport, StatusCounts, WorkerPool,
    WorkerPoolConfig, WorkerSnapshot,
};
pub use jobs::{pid_file_path, read_worker_pid};

/// Current version of jobq
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }
}
