//! Worker pool and graceful shutdown
//!
//! Each worker is an independent loop with a stable id (`worker_1`,
//! `worker_2`, ...): claim a job, run it through the executor, report
//! the outcome back to the store. Workers never crash on per-job
//! errors; transient store errors are logged and followed by a short
//! sleep.
//!
//! The pool also owns the shutdown coordinator: on stop it blocks new
//! claims, waits a bounded time for busy workers to drain, and reports
//! the ones still busy as orphaned (their in-flight jobs come back via
//! the stale-lock horizon).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::jobs::job::Job;
use crate::jobs::retry::DEFAULT_BACKOFF_BASE;
use crate::jobs::runner::JobExecutor;
use crate::jobs::store::JobStore;

/// Idle polling cadence of a worker loop
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bounded wait for busy workers during shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Pid file written next to the data files while a worker process runs
pub const PID_FILE: &str = "worker.pid";

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker loops
    pub worker_count: usize,

    /// Base of the retry backoff applied when reporting failures
    pub backoff_base: f64,

    /// Sleep between claim attempts when the queue is empty
    pub poll_interval: Duration,

    /// How long shutdown waits for busy workers
    pub shutdown_grace: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            backoff_base: DEFAULT_BACKOFF_BASE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Per-worker bookkeeping shared with the spawned loop
#[derive(Debug, Clone)]
struct WorkerRecord {
    id: String,
    busy: Arc<AtomicBool>,
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl WorkerRecord {
    fn new(index: usize) -> Self {
        Self {
            id: format!("worker_{}", index),
            busy: Arc::new(AtomicBool::new(false)),
            succeeded: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Point-in-time view of one worker
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerSnapshot {
    pub id: String,
    pub busy: bool,
    pub succeeded: u64,
    pub failed: u64,
}

/// Result of the shutdown coordinator
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Workers still busy when the grace period expired
    pub orphaned: Vec<String>,
}

impl ShutdownReport {
    /// True when every worker drained in time
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty()
    }
}

/// A pool of N worker loops sharing one store and one executor
pub struct WorkerPool {
    store: Arc<JobStore>,
    executor: Arc<dyn JobExecutor>,
    config: WorkerPoolConfig,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<WorkerRecord>>,
}

impl WorkerPool {
    /// Create a pool; workers start with [`WorkerPool::start`]
    pub fn new(
        store: Arc<JobStore>,
        executor: Arc<dyn JobExecutor>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            store,
            executor,
            config,
            running: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Whether the pool is accepting new claims
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the worker loops and record this process's pid next to
    /// the data files.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::precondition("Worker pool is already running"));
        }

        let pid_path = pid_file_path(self.store.data_dir());
        tokio::fs::write(&pid_path, std::process::id().to_string()).await?;

        let mut workers = Vec::with_capacity(self.config.worker_count);
        for index in 1..=self.config.worker_count {
            let record = WorkerRecord::new(index);
            workers.push(record.clone());

            let store = self.store.clone();
            let executor = self.executor.clone();
            let running = self.running.clone();
            let poll_interval = self.config.poll_interval;
            let backoff_base = self.config.backoff_base;
            tokio::spawn(async move {
                worker_loop(record, store, executor, running, poll_interval, backoff_base).await;
            });
        }
        *self.workers.lock().unwrap_or_else(|e| e.into_inner()) = workers;

        info!(count = self.config.worker_count, "worker pool started");
        Ok(())
    }

    /// Point-in-time snapshot of every worker
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|w| WorkerSnapshot {
                id: w.id.clone(),
                busy: w.busy.load(Ordering::SeqCst),
                succeeded: w.succeeded.load(Ordering::SeqCst),
                failed: w.failed.load(Ordering::SeqCst),
            })
            .collect()
    }

    /// Terminate the child process of a running job (graceful, then
    /// forceful). The job's disposition then follows the normal
    /// failure path. Returns whether a running child was found.
    pub async fn cancel_running(&self, job_id: &str) -> bool {
        self.executor.terminate(job_id).await
    }

    /// Graceful stop: no new claims, bounded wait for busy workers,
    /// then report the ones left behind.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.running.store(false, Ordering::SeqCst);
        info!("worker pool stopping, waiting for busy workers");

        let deadline = Instant::now() + self.config.shutdown_grace;
        loop {
            let busy: Vec<String> = self
                .workers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .filter(|w| w.busy.load(Ordering::SeqCst))
                .map(|w| w.id.clone())
                .collect();

            if busy.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    workers = ?busy,
                    "shutdown grace period expired, abandoning busy workers"
                );
                // Don't leave their children running behind us.
                self.executor.terminate_all().await;
                self.remove_pid_file().await;
                return ShutdownReport { orphaned: busy };
            }
            sleep(Duration::from_millis(100)).await;
        }

        self.remove_pid_file().await;
        info!("worker pool stopped");
        ShutdownReport::default()
    }

    /// Start the pool and run until SIGINT/SIGTERM, then shut down
    /// gracefully.
    pub async fn run_until_signal(&self) -> Result<ShutdownReport> {
        self.start().await?;
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        Ok(self.shutdown().await)
    }

    async fn remove_pid_file(&self) {
        let _ = tokio::fs::remove_file(pid_file_path(self.store.data_dir())).await;
    }
}

async fn worker_loop(
    record: WorkerRecord,
    store: Arc<JobStore>,
    executor: Arc<dyn JobExecutor>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    backoff_base: f64,
) {
    info!(worker_id = %record.id, "worker started");

    while running.load(Ordering::SeqCst) {
        match store.claim_next(&record.id).await {
            Ok(Some(job)) => {
                record.busy.store(true, Ordering::SeqCst);
                process_job(&record, &store, executor.as_ref(), job, backoff_base).await;
                record.busy.store(false, Ordering::SeqCst);
            }
            Ok(None) => sleep(poll_interval).await,
            Err(e) => {
                warn!(worker_id = %record.id, error = %e, "claim failed, backing off");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    info!(worker_id = %record.id, "worker stopped");
}

async fn process_job(
    record: &WorkerRecord,
    store: &JobStore,
    executor: &dyn JobExecutor,
    job: Job,
    backoff_base: f64,
) {
    info!(
        worker_id = %record.id,
        job_id = %job.id,
        attempt = job.attempts + 1,
        max_retries = job.max_retries,
        "executing job"
    );

    match executor.execute(&job).await {
        Ok(_) => {
            match store.complete(&job.id).await {
                Ok(_) => {
                    record.succeeded.fetch_add(1, Ordering::SeqCst);
                    info!(worker_id = %record.id, job_id = %job.id, "job completed");
                }
                Err(e) => {
                    error!(worker_id = %record.id, job_id = %job.id, error = %e, "failed to record completion");
                }
            }
        }
        Err(exec_err) => {
            warn!(worker_id = %record.id, job_id = %job.id, error = %exec_err, "job attempt failed");
            match store.fail(&job.id, &exec_err.to_string(), backoff_base).await {
                Ok(_) => {
                    record.failed.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    error!(worker_id = %record.id, job_id = %job.id, error = %e, "failed to record failure");
                }
            }
        }
    }
}

/// Path of the worker pid file inside a data directory
pub fn pid_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(PID_FILE)
}

/// Read the pid of the worker process recorded in the data directory,
/// if any.
pub async fn read_worker_pid(data_dir: &Path) -> Option<u32> {
    let contents = tokio::fs::read_to_string(pid_file_path(data_dir)).await.ok()?;
    contents.trim().parse().ok()
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
