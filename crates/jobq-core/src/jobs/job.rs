//! Job types and definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default priority for new jobs (5 = lowest)
pub const DEFAULT_PRIORITY: u8 = 5;

/// Default retry limit for new jobs
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-attempt timeout for new jobs (5 minutes)
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// A claim older than this is presumed abandoned by a crashed worker
/// and may be taken over by another one.
pub const STALE_LOCK_HORIZON_SECS: i64 = 300;

/// Job execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed by a worker
    Pending,

    /// Claimed and executing
    Processing,

    /// Failed, scheduled for a retry at `next_retry_at`
    Failed,

    /// Finished successfully
    Completed,

    /// Exhausted all retries (in the dead letter queue)
    Dead,

    /// Cancelled by the user
    Cancelled,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Processing => write!(f, "processing"),
            JobState::Failed => write!(f, "failed"),
            JobState::Completed => write!(f, "completed"),
            JobState::Dead => write!(f, "dead"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "failed" => Ok(JobState::Failed),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(Error::validation(format!("Unknown job state: {}", other))),
        }
    }
}

impl JobState {
    /// Check if the state is terminal (the engine will not move the
    /// job again without explicit revival)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Dead | JobState::Cancelled
        )
    }

    /// Check if the job may be cancelled from this state
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Failed | JobState::Dead)
    }
}

/// A unit of work: a shell command plus scheduling metadata.
///
/// Jobs are created by [`crate::JobStore::enqueue`] and mutated only
/// through store operations; workers hold an owned snapshot across a
/// single execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id (caller-supplied or generated)
    pub id: String,

    /// Shell command, passed verbatim to the platform shell
    pub command: String,

    /// Current state
    pub state: JobState,

    /// Priority 1..=5, 1 = highest
    pub priority: u8,

    /// Completed execution attempts
    pub attempts: u32,

    /// Attempt count at which the job moves to the dead letter queue
    pub max_retries: u32,

    /// Per-attempt wall-clock limit in milliseconds
    pub timeout_ms: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,

    /// Earliest time a worker may reclaim a failed job
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Last failure's diagnostic
    pub error: Option<String>,

    /// Id of the worker holding the current claim
    pub locked_by: Option<String>,

    /// When the current claim began
    pub locked_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Generate a fresh job id
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Check whether the claim on this job is older than the
    /// stale-lock horizon
    pub fn is_lock_stale(&self, now: DateTime<Utc>) -> bool {
        match self.locked_at {
            Some(locked_at) => {
                (now - locked_at) > chrono::Duration::seconds(STALE_LOCK_HORIZON_SECS)
            }
            None => false,
        }
    }

    /// Check whether a worker may claim this job right now.
    ///
    /// Eligible: pending; failed past its retry time; or processing
    /// under a stale claim (previous holder presumed crashed).
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Pending => true,
            JobState::Failed => self
                .next_retry_at
                .map(|at| at <= now)
                .unwrap_or(false),
            JobState::Processing => self.locked_by.is_some() && self.is_lock_stale(now),
            JobState::Completed | JobState::Dead | JobState::Cancelled => false,
        }
    }

    /// Transition to processing under the given worker's claim
    pub fn mark_claimed(&mut self, worker_id: &str) {
        let now = Utc::now();
        self.state = JobState::Processing;
        self.locked_by = Some(worker_id.to_string());
        self.locked_at = Some(now);
        self.updated_at = now;
    }

    /// Transition to completed, clearing the claim
    pub fn mark_completed(&mut self) {
        self.state = JobState::Completed;
        self.clear_lock();
        self.updated_at = Utc::now();
    }

    /// Record a failed attempt, scheduling the retry
    pub fn mark_failed(&mut self, error: String, next_retry_at: DateTime<Utc>) {
        self.state = JobState::Failed;
        self.attempts += 1;
        self.error = Some(error);
        self.next_retry_at = Some(next_retry_at);
        self.clear_lock();
        self.updated_at = Utc::now();
    }

    /// Record a final failed attempt, parking the job in the DLQ
    pub fn mark_dead(&mut self, error: String) {
        self.state = JobState::Dead;
        self.attempts += 1;
        self.error = Some(error);
        self.next_retry_at = None;
        self.clear_lock();
        self.updated_at = Utc::now();
    }

    /// Transition to cancelled, clearing the claim and any scheduled
    /// retry
    pub fn mark_cancelled(&mut self) {
        self.state = JobState::Cancelled;
        self.next_retry_at = None;
        self.clear_lock();
        self.updated_at = Utc::now();
    }

    /// Revive a dead job back to pending with a clean slate
    pub fn revive(&mut self) {
        self.state = JobState::Pending;
        self.attempts = 0;
        self.error = None;
        self.next_retry_at = None;
        self.clear_lock();
        self.updated_at = Utc::now();
    }

    fn clear_lock(&mut self) {
        self.locked_by = None;
        self.locked_at = None;
    }
}

/// Input for enqueueing a job. Unset fields are filled with defaults
/// by the store.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    /// Shell command to execute
    pub command: String,

    /// Caller-supplied id (generated when absent)
    pub id: Option<String>,

    /// Priority 1..=5
    pub priority: Option<u8>,

    /// Retry limit
    pub max_retries: Option<u32>,

    /// Per-attempt timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

impl NewJob {
    /// Create a new job request for the given command
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Use a caller-supplied id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the priority (1 = highest, 5 = lowest)
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the retry limit
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Validate the request and fill defaults, producing a pending job
    pub fn into_job(self, default_max_retries: u32) -> Result<Job> {
        if self.command.trim().is_empty() {
            return Err(Error::validation("Command cannot be empty"));
        }

        let priority = self.priority.unwrap_or(DEFAULT_PRIORITY);
        if !(1..=5).contains(&priority) {
            return Err(Error::validation(format!(
                "Priority must be between 1 and 5, got {}",
                priority
            )));
        }

        let max_retries = self.max_retries.unwrap_or(default_max_retries);
        if max_retries == 0 {
            return Err(Error::validation("max_retries must be positive"));
        }

        let timeout_ms = self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(Error::validation("timeout_ms must be positive"));
        }

        if let Some(ref id) = self.id {
            if id.trim().is_empty() {
                return Err(Error::validation("Job id cannot be empty"));
            }
        }

        let now = Utc::now();
        Ok(Job {
            id: self.id.unwrap_or_else(Job::generate_id),
            command: self.command,
            state: JobState::Pending,
            priority,
            attempts: 0,
            max_retries,
            timeout_ms,
            created_at: now,
            updated_at: now,
            next_retry_at: None,
            error: None,
            locked_by: None,
            locked_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(command: &str) -> Job {
        NewJob::new(command).into_job(DEFAULT_MAX_RETRIES).unwrap()
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            JobState::Pending,
            JobState::Processing,
            JobState::Failed,
            JobState::Completed,
            JobState::Dead,
            JobState::Cancelled,
        ] {
            let parsed: JobState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("limbo".parse::<JobState>().is_err());
    }

    #[test]
    fn test_serde_lowercase_states() {
        let j = job("echo hi");
        let json = serde_json::to_string(&j).unwrap();
        assert!(json.contains("\"state\":\"pending\""));
    }

    #[test]
    fn test_new_job_defaults() {
        let j = job("echo hi");
        assert_eq!(j.state, JobState::Pending);
        assert_eq!(j.priority, DEFAULT_PRIORITY);
        assert_eq!(j.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(j.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(j.attempts, 0);
        assert!(j.locked_by.is_none());
    }

    #[test]
    fn test_new_job_validation() {
        assert!(NewJob::new("   ").into_job(3).is_err());
        assert!(NewJob::new("ls").with_priority(0).into_job(3).is_err());
        assert!(NewJob::new("ls").with_priority(6).into_job(3).is_err());
        assert!(NewJob::new("ls").with_max_retries(0).into_job(3).is_err());
        assert!(NewJob::new("ls").with_timeout_ms(0).into_job(3).is_err());
        assert!(NewJob::new("ls").with_id("  ").into_job(3).is_err());
    }

    #[test]
    fn test_generated_ids_unique() {
        let a = Job::generate_id();
        let b = Job::generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_claim_lifecycle() {
        let mut j = job("echo hi");
        j.mark_claimed("worker_1");
        assert_eq!(j.state, JobState::Processing);
        assert_eq!(j.locked_by.as_deref(), Some("worker_1"));
        assert!(j.locked_at.is_some());

        j.mark_completed();
        assert_eq!(j.state, JobState::Completed);
        assert!(j.locked_by.is_none());
        assert!(j.locked_at.is_none());
    }

    #[test]
    fn test_failed_then_revive() {
        let mut j = job("exit 1");
        j.mark_claimed("worker_1");
        j.mark_failed("boom".to_string(), Utc::now() + chrono::Duration::seconds(2));
        assert_eq!(j.state, JobState::Failed);
        assert_eq!(j.attempts, 1);
        assert!(j.next_retry_at.is_some());

        j.mark_claimed("worker_1");
        j.mark_dead("boom again".to_string());
        assert_eq!(j.state, JobState::Dead);
        assert_eq!(j.attempts, 2);

        j.revive();
        assert_eq!(j.state, JobState::Pending);
        assert_eq!(j.attempts, 0);
        assert!(j.error.is_none());
        assert!(j.next_retry_at.is_none());
    }

    #[test]
    fn test_claimable_rules() {
        let now = Utc::now();

        let pending = job("echo hi");
        assert!(pending.is_claimable(now));

        let mut failed = job("exit 1");
        failed.mark_claimed("worker_1");
        failed.mark_failed("err".to_string(), now + chrono::Duration::seconds(30));
        assert!(!failed.is_claimable(now));
        assert!(failed.is_claimable(now + chrono::Duration::seconds(31)));

        let mut fresh_claim = job("sleep 1");
        fresh_claim.mark_claimed("worker_1");
        assert!(!fresh_claim.is_claimable(now));

        // A claim past the stale horizon is up for grabs again.
        let mut stale = job("sleep 1");
        stale.mark_claimed("worker_1");
        stale.locked_at = Some(now - chrono::Duration::seconds(STALE_LOCK_HORIZON_SECS + 1));
        assert!(stale.is_claimable(now));

        let mut done = job("echo hi");
        done.mark_claimed("worker_1");
        done.mark_completed();
        assert!(!done.is_claimable(now));
    }

    #[test]
    fn test_cancellable_states() {
        assert!(JobState::Pending.is_cancellable());
        assert!(JobState::Failed.is_cancellable());
        assert!(JobState::Dead.is_cancellable());
        assert!(!JobState::Processing.is_cancellable());
        assert!(!JobState::Completed.is_cancellable());
        assert!(!JobState::Cancelled.is_cancellable());
    }
}
