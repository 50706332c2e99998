// Retry logic: exponential backoff keyed on the job's attempt count
use crate::domain::Job;
use crate::port::time_provider::duration_millis;
use std::time::Duration;
use tracing::{info, warn};

/// Default backoff base (1 minute): delays are 2, 4, 8, ... minutes
pub const DEFAULT_BASE_DELAY_MS: i64 = 60 * 1000;

/// Exponent ceiling so the shift never overflows an i64 millisecond value
const MAX_BACKOFF_EXPONENT: i32 = 30;

/// Smallest delay; a retry is always scheduled strictly after the failure
const MIN_DELAY_MS: i64 = 1;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule the job after this many ms
    Retry(i64),
    /// Attempts exhausted, job has failed permanently
    Failed,
}

/// Retry policy shared by every backend
///
/// delay = base_delay * 2^attempt_count, optionally capped
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay_ms: i64,
    max_delay_ms: Option<i64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS)
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `base_delay_ms` - Base delay in milliseconds (default: 60_000),
    ///   raised to 1ms if smaller
    pub fn new(base_delay_ms: i64) -> Self {
        Self {
            base_delay_ms: base_delay_ms.max(MIN_DELAY_MS),
            max_delay_ms: None,
        }
    }

    /// Cap the backoff delay (a cap below 1ms is raised to 1ms)
    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_delay_ms = Some(duration_millis(max).max(MIN_DELAY_MS));
        self
    }

    /// Backoff for a job that has been attempted `attempt_count` times
    pub fn backoff_ms(&self, attempt_count: i32) -> i64 {
        let exponent = attempt_count.clamp(0, MAX_BACKOFF_EXPONENT);
        let delay = self.base_delay_ms.saturating_mul(1_i64 << exponent);
        match self.max_delay_ms {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Decide between reschedule and terminal failure from raw counters
    pub fn decide(&self, attempt_count: i32, max_attempts: i32) -> RetryDecision {
        if attempt_count >= max_attempts {
            RetryDecision::Failed
        } else {
            RetryDecision::Retry(self.backoff_ms(attempt_count))
        }
    }

    /// Determine if a job should be retried
    ///
    /// Returns:
    /// - `RetryDecision::Retry(delay_ms)` with the computed backoff
    /// - `RetryDecision::Failed` if max attempts reached
    pub fn should_retry(&self, job: &Job) -> RetryDecision {
        let decision = self.decide(job.attempt_count, job.max_attempts);
        match decision {
            RetryDecision::Failed => warn!(
                job_id = %job.id,
                attempts = %job.attempt_count,
                max_attempts = %job.max_attempts,
                "Max retry attempts reached"
            ),
            RetryDecision::Retry(delay_ms) => info!(
                job_id = %job.id,
                attempt = %job.attempt_count,
                max_attempts = %job.max_attempts,
                delay_ms = %delay_ms,
                "Scheduling retry"
            ),
        }
        decision
    }
}
