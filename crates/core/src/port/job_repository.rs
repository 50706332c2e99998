// Job Repository Port (Interface)
//
// The single outward-facing boundary of the queue: producers enqueue through it,
// the worker pool dequeues/completes/fails through it. Implementations:
// - InMemoryJobRepository (this crate, reference backend for tests)
// - SqliteJobRepository (workq-infra-sqlite)
// - PgJobRepository (workq-infra-postgres)

use crate::domain::{Job, JobFilter, JobPayload, Priority, QueueStats, RateLimit};
use crate::error::Result;
use crate::port::time_provider::duration_millis;
use async_trait::async_trait;
use std::time::Duration;

/// When a newly enqueued job becomes eligible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    #[default]
    Now,
    /// Absolute time, epoch ms
    At(i64),
    /// Relative to the enqueue time
    After(Duration),
}

/// Enqueue options
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub max_attempts: i32,
    pub schedule: Schedule,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            max_attempts: 3,
            schedule: Schedule::Now,
        }
    }
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Run at an absolute time (replaces any delay)
    pub fn scheduled_at(mut self, at_millis: i64) -> Self {
        self.schedule = Schedule::At(at_millis);
        self
    }

    /// Run after a delay (replaces any absolute time)
    pub fn delay(mut self, delay: Duration) -> Self {
        self.schedule = Schedule::After(delay);
        self
    }

    /// Resolve the eligible-at timestamp relative to `now_millis`
    pub fn resolve_scheduled_at(&self, now_millis: i64) -> i64 {
        match self.schedule {
            Schedule::Now => now_millis,
            Schedule::At(at) => at,
            Schedule::After(delay) => now_millis.saturating_add(duration_millis(delay)),
        }
    }
}

/// Dequeue options
#[derive(Debug, Clone, Default)]
pub struct DequeueOptions {
    /// Restrict to these queues; empty means any queue
    pub queues: Vec<String>,
}

impl DequeueOptions {
    pub fn any_queue() -> Self {
        Self::default()
    }

    pub fn for_queues<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queues: queues.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accepts(&self, queue_name: &str) -> bool {
        self.queues.is_empty() || self.queues.iter().any(|q| q == queue_name)
    }
}

/// Durable job storage plus the dequeue/retry/rate-limit algorithms.
///
/// Every operation is individually atomic. Callers that need a deadline wrap
/// the returned future in `tokio::time::timeout`; dropping it cancels the call.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new pending job and return it as persisted
    async fn enqueue(
        &self,
        queue_name: &str,
        job_type: &str,
        org_id: &str,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<Job>;

    /// Atomically claim one eligible job (priority DESC, then FIFO).
    ///
    /// Returns `Ok(None)` when nothing is eligible. Two concurrent callers
    /// never receive the same job.
    async fn dequeue(&self, worker_id: &str, options: &DequeueOptions) -> Result<Option<Job>>;

    /// processing -> completed
    async fn complete(&self, id: &str, result: Option<JobPayload>) -> Result<()>;

    /// processing -> pending with exponential backoff, or -> failed when
    /// attempts are exhausted
    async fn fail(&self, id: &str, error_message: &str) -> Result<()>;

    /// Remove a job row; no error if absent
    async fn delete(&self, id: &str) -> Result<()>;

    /// Find job by ID (`AppError::NotFound` if absent)
    async fn get_job(&self, id: &str) -> Result<Job>;

    /// List jobs matching the filter, newest first
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Status counts and mean processing time over the trailing stats window
    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats>;

    /// Advisory admission check for one (organization, queue)
    async fn can_process_job(&self, org_id: &str, queue_name: &str) -> Result<bool>;

    /// Count one processed job in the rolling hourly window
    async fn record_job_processed(&self, org_id: &str, queue_name: &str) -> Result<()>;

    /// Override the default limits for one (organization, queue)
    async fn set_rate_limit(&self, org_id: &str, queue_name: &str, limit: RateLimit)
        -> Result<()>;

    /// Return jobs stuck in processing since before `started_before` to pending
    async fn requeue_stale(&self, started_before: i64) -> Result<u64>;

    /// Delete completed/failed jobs finished before `completed_before`
    async fn purge_finished(&self, completed_before: i64) -> Result<u64>;

    /// Release underlying storage resources
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_resolution() {
        let now = 10_000;
        assert_eq!(EnqueueOptions::new().resolve_scheduled_at(now), now);
        assert_eq!(
            EnqueueOptions::new()
                .scheduled_at(50_000)
                .resolve_scheduled_at(now),
            50_000
        );
        assert_eq!(
            EnqueueOptions::new()
                .delay(Duration::from_secs(5))
                .resolve_scheduled_at(now),
            15_000
        );
    }

    #[test]
    fn test_huge_delay_stays_in_the_future() {
        let now = 1_700_000_000_000;
        let at = EnqueueOptions::new()
            .delay(Duration::from_secs(u64::MAX / 1000))
            .resolve_scheduled_at(now);
        assert_eq!(at, i64::MAX);
    }

    #[test]
    fn test_delay_and_scheduled_at_are_exclusive() {
        let opts = EnqueueOptions::new()
            .scheduled_at(50_000)
            .delay(Duration::from_secs(1));
        assert_eq!(opts.schedule, Schedule::After(Duration::from_secs(1)));
    }

    #[test]
    fn test_dequeue_options_queue_filter() {
        assert!(DequeueOptions::any_queue().accepts("anything"));
        let opts = DequeueOptions::for_queues(["photos", "reports"]);
        assert!(opts.accepts("photos"));
        assert!(!opts.accepts("emails"));
    }
}
