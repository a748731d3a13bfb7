//! The queue engine
//!
//! A local, persistent background job queue:
//! - Durable job store backed by a JSON file, shared across processes
//!   through a file lock
//! - Priority- and retry-aware dispatch with stale-claim recovery
//! - Exponential backoff retries with a dead letter queue
//! - Worker loops executing jobs as shell subprocesses under a
//!   per-job timeout
//! - Graceful shutdown with a bounded drain
//!
//! ## Architecture
//!
//! ```text
//! CLI ──► JobStore (enqueue / cancel / DLQ ops / status)
//! CLI ──► WorkerPool (start / stop)
//!
//! worker loop:  claim_next ──► ShellRunner ──► complete / fail
//!                   ▲                               │
//!                   └──────── jobs.json ◄───────────┘
//!                        (all writes through store
//!                         transactions, file-locked)
//! ```

pub mod job;
pub mod lock;
pub mod metrics;
pub mod retry;
pub mod runner;
pub mod store;
pub mod worker;

// Re-export main types
pub use job::{Job, JobState, NewJob, DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY, DEFAULT_TIMEOUT_MS};
pub use lock::{LockGuard, StoreLock};
pub use metrics::QueueMetrics;
pub use retry::{BackoffPolicy, RetryDecision, DEFAULT_BACKOFF_BASE};
pub use runner::{ExecutionError, ExecutionOutput, JobExecutor, ShellRunner};
pub use store::{JobStore, StatusCounts};
pub use worker::{
    pid_file_path, read_worker_pid, ShutdownReport, WorkerPool, WorkerPoolConfig, WorkerSnapshot,
};
