//! Retry policy with exponential backoff

use chrono::{DateTime, Duration, Utc};

/// Default base of the backoff exponential
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;

/// Outcome of applying the retry policy to a failed attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Reschedule; the job may be reclaimed at the given time
    RetryAt(DateTime<Utc>),

    /// Retries exhausted; park the job in the dead letter queue
    Dead,
}

/// Exponential backoff policy.
///
/// The delay before attempt `n + 1` is `base^n` seconds, so with the
/// default base of 2 a job waits 2s, 4s, 8s, ... between attempts.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base: f64,
}

impl BackoffPolicy {
    /// Create a policy with the given base
    pub fn new(base: f64) -> Self {
        Self { base }
    }

    /// The configured base
    pub fn base(&self) -> f64 {
        self.base
    }

    /// Delay scheduled after `attempts` completed attempts
    pub fn delay(&self, attempts: u32) -> Duration {
        let secs = self.base.powi(attempts as i32);
        Duration::milliseconds((secs * 1000.0) as i64)
    }

    /// Decide what happens to a job whose attempt just failed.
    ///
    /// `attempts` is the count *including* the failed attempt.
    pub fn decide(&self, attempts: u32, max_retries: u32, now: DateTime<Utc>) -> RetryDecision {
        if attempts >= max_retries {
            RetryDecision::Dead
        } else {
            RetryDecision::RetryAt(now + self.delay(attempts))
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE)
    }
}
