//! Durable job store with transactional mutation
//!
//! The store owns the on-disk collection (`jobs.json`) and is the only
//! component allowed to mutate it. Every public operation runs as one
//! transaction: acquire the cross-process file lock, read the
//! collection, mutate it in memory, write it back atomically (temp
//! file + rename), release the lock. A failed mutation leaves the
//! on-disk state untouched.
//!
//! Claim selection (the dispatch policy) lives inside the `claim_next`
//! transaction so that two workers can never claim the same job.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::jobs::job::{Job, JobState, NewJob, DEFAULT_MAX_RETRIES};
use crate::jobs::lock::{lock_path_for, StoreLock};
use crate::jobs::metrics::QueueMetrics;
use crate::jobs::retry::{BackoffPolicy, RetryDecision};

/// Data file name inside the data directory
pub const JOBS_FILE: &str = "jobs.json";

/// Per-state job counts, as reported by `status`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    pub completed: usize,
    pub dead: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    /// Total jobs across all states
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.failed + self.completed + self.dead + self.cancelled
    }

    fn tally(jobs: &[Job]) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            match job.state {
                JobState::Pending => counts.pending += 1,
                JobState::Processing => counts.processing += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Dead => counts.dead += 1,
                JobState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

/// Durable, lock-serialized container of all jobs
#[derive(Debug, Clone)]
pub struct JobStore {
    data_dir: PathBuf,
    jobs_path: PathBuf,
    lock: StoreLock,
    default_max_retries: u32,
}

impl JobStore {
    /// Open (creating if needed) a store rooted at the given data
    /// directory.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;
        let jobs_path = data_dir.join(JOBS_FILE);
        let lock = StoreLock::new(lock_path_for(&data_dir));
        Ok(Self {
            data_dir,
            jobs_path,
            lock,
            default_max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Override the default retry limit applied when an enqueue does
    /// not supply one (usually the `max-retries` config value).
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// The store's data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Enqueue a new job in state `pending`.
    ///
    /// Validates the request, fills defaults, generates an id when the
    /// caller did not supply one, and rejects colliding ids.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job> {
        let job = new_job.into_job(self.default_max_retries)?;
        let enqueued = self
            .transact(move |jobs| {
                if jobs.iter().any(|j| j.id == job.id) {
                    return Err(Error::validation(format!(
                        "Job id already exists: {}",
                        job.id
                    )));
                }
                jobs.push(job.clone());
                Ok((job, true))
            })
            .await?;
        info!(job_id = %enqueued.id, priority = enqueued.priority, "job enqueued");
        Ok(enqueued)
    }

    /// Claim the next runnable job for a worker, or return `None`.
    ///
    /// Eligible jobs are pending jobs, failed jobs past their retry
    /// time, and jobs stuck under a stale claim. The eligible set is
    /// ordered by priority (1 first), ties broken oldest first.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        let worker_id = worker_id.to_string();
        self.transact(move |jobs| {
            let now = Utc::now();
            let mut best: Option<usize> = None;
            for idx in 0..jobs.len() {
                if !jobs[idx].is_claimable(now) {
                    continue;
                }
                best = Some(match best {
                    None => idx,
                    Some(current) => {
                        let (cand, held) = (&jobs[idx], &jobs[current]);
                        if (cand.priority, cand.created_at) < (held.priority, held.created_at) {
                            idx
                        } else {
                            current
                        }
                    }
                });
            }

            match best {
                Some(idx) => {
                    if jobs[idx].state == JobState::Processing {
                        debug!(
                            job_id = %jobs[idx].id,
                            previous_holder = ?jobs[idx].locked_by,
                            "reclaiming job from stale lock"
                        );
                    }
                    jobs[idx].mark_claimed(&worker_id);
                    Ok((Some(jobs[idx].clone()), true))
                }
                None => Ok((None, false)),
            }
        })
        .await
    }

    /// Mark a processing job as completed
    pub async fn complete(&self, job_id: &str) -> Result<Job> {
        let job_id = job_id.to_string();
        self.transact(move |jobs| {
            let idx = position_of(jobs, &job_id)?;
            let job = &mut jobs[idx];
            if job.state != JobState::Processing {
                return Err(Error::precondition(format!(
                    "Cannot complete job {} in state {}",
                    job.id, job.state
                )));
            }
            job.mark_completed();
            Ok((job.clone(), true))
        })
        .await
    }

    /// Record a failed attempt on a processing job, applying the retry
    /// policy: reschedule with exponential backoff, or park in the DLQ
    /// once retries are exhausted.
    pub async fn fail(&self, job_id: &str, error: &str, backoff_base: f64) -> Result<Job> {
        let job_id = job_id.to_string();
        let error = error.to_string();
        let policy = BackoffPolicy::new(backoff_base);
        let failed = self
            .transact(move |jobs| {
                let idx = position_of(jobs, &job_id)?;
                let job = &mut jobs[idx];
                if job.state != JobState::Processing {
                    return Err(Error::precondition(format!(
                        "Cannot fail job {} in state {}",
                        job.id, job.state
                    )));
                }
                let attempts_after = job.attempts + 1;
                match policy.decide(attempts_after, job.max_retries, Utc::now()) {
                    RetryDecision::RetryAt(at) => job.mark_failed(error, at),
                    RetryDecision::Dead => job.mark_dead(error),
                }
                Ok((job.clone(), true))
            })
            .await?;

        match failed.state {
            JobState::Dead => info!(
                job_id = %failed.id,
                attempts = failed.attempts,
                "job moved to dead letter queue"
            ),
            _ => info!(
                job_id = %failed.id,
                attempts = failed.attempts,
                next_retry_at = ?failed.next_retry_at,
                "job scheduled for retry"
            ),
        }
        Ok(failed)
    }

    /// Cancel a job. Legal only from `pending`, `failed`, or `dead`;
    /// a running or finished job is rejected with a precondition
    /// error.
    pub async fn cancel(&self, job_id: &str) -> Result<Job> {
        let job_id = job_id.to_string();
        self.transact(move |jobs| {
            let idx = position_of(jobs, &job_id)?;
            let job = &mut jobs[idx];
            if !job.state.is_cancellable() {
                return Err(Error::precondition(format!(
                    "Cannot cancel job {} in state {}",
                    job.id, job.state
                )));
            }
            job.mark_cancelled();
            Ok((job.clone(), true))
        })
        .await
    }

    /// Revive a dead job: back to `pending` with attempts, error, and
    /// retry schedule reset.
    pub async fn retry_from_dlq(&self, job_id: &str) -> Result<Job> {
        let job_id = job_id.to_string();
        self.transact(move |jobs| {
            let idx = position_of(jobs, &job_id)?;
            let job = &mut jobs[idx];
            if job.state != JobState::Dead {
                return Err(Error::precondition(format!(
                    "Cannot retry job {} in state {}, only dead jobs can be retried",
                    job.id, job.state
                )));
            }
            job.revive();
            Ok((job.clone(), true))
        })
        .await
    }

    /// Look up a single job by id
    pub async fn get(&self, job_id: &str) -> Result<Job> {
        let job_id = job_id.to_string();
        self.transact(move |jobs| {
            let idx = position_of(jobs, &job_id)?;
            Ok((jobs[idx].clone(), false))
        })
        .await
    }

    /// List jobs, optionally filtered by state, newest first by
    /// creation time.
    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        self.transact(move |jobs| {
            let mut listed: Vec<Job> = jobs
                .iter()
                .filter(|j| state.map_or(true, |s| j.state == s))
                .cloned()
                .collect();
            listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok((listed, false))
        })
        .await
    }

    /// List the dead letter queue, newest first by last update
    pub async fn list_dlq(&self) -> Result<Vec<Job>> {
        self.transact(move |jobs| {
            let mut dead: Vec<Job> = jobs
                .iter()
                .filter(|j| j.state == JobState::Dead)
                .cloned()
                .collect();
            dead.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok((dead, false))
        })
        .await
    }

    /// Per-state job counts
    pub async fn status(&self) -> Result<StatusCounts> {
        self.transact(move |jobs| Ok((StatusCounts::tally(jobs), false)))
            .await
    }

    /// Aggregate queue metrics
    pub async fn metrics(&self) -> Result<QueueMetrics> {
        self.transact(move |jobs| Ok((QueueMetrics::from_jobs(jobs), false)))
            .await
    }

    /// Run one atomic transaction over the collection.
    ///
    /// The closure returns the operation's value plus a dirty flag;
    /// the collection is only written back when the flag is set. The
    /// lock is released on every exit path.
    async fn transact<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Job>) -> Result<(T, bool)>,
    {
        let guard = self.lock.acquire().await?;

        let result: Result<T> = async {
            let mut jobs = self.read_jobs().await?;
            let (value, dirty) = mutate(&mut jobs)?;
            if dirty {
                self.write_jobs(&jobs).await?;
            }
            Ok(value)
        }
        .await;

        let released = guard.release().await;
        let value = result?;
        released?;
        Ok(value)
    }

    async fn read_jobs(&self) -> Result<Vec<Job>> {
        match tokio::fs::read(&self.jobs_path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_jobs(&self, jobs: &[Job]) -> Result<()> {
        let tmp_path = self.jobs_path.with_file_name(format!("{}.tmp", JOBS_FILE));
        let bytes = serde_json::to_vec_pretty(jobs)?;
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &self.jobs_path).await?;
        Ok(())
    }
}

fn position_of(jobs: &[Job], job_id: &str) -> Result<usize> {
    jobs.iter()
        .position(|j| j.id == job_id)
        .ok_or_else(|| Error::not_found(job_id.to_string()))
}
