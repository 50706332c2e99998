// Job Handler Port
// Business callbacks invoked by the worker pool, keyed by job type

use crate::domain::{Job, JobPayload};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Error returned by a handler; its `Display` text becomes the job's error message
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Optional result blob on success
pub type HandlerResult = std::result::Result<Option<JobPayload>, HandlerError>;

/// Deadline used when `now + timeout` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Returned by [`JobContext::check`] once the invocation deadline has passed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("job deadline exceeded")]
pub struct DeadlineExceeded;

/// Per-invocation context handed to a handler.
///
/// The pool never interrupts a running handler; `job_timeout` reaches it only
/// as this deadline, which the handler checks between steps.
#[derive(Debug, Clone)]
pub struct JobContext {
    worker_id: String,
    attempt: i32,
    deadline: Instant,
}

impl JobContext {
    pub fn new(worker_id: impl Into<String>, attempt: i32, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            worker_id: worker_id.into(),
            attempt,
            deadline: now.checked_add(timeout).unwrap_or(now + FAR_FUTURE),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// 1-based attempt number of this invocation
    pub fn attempt(&self) -> i32 {
        self.attempt
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Resolves when the deadline passes
    pub async fn expired(&self) {
        tokio::time::sleep_until(self.deadline).await
    }

    /// `Err(DeadlineExceeded)` once expired; use with `?` between steps
    pub fn check(&self) -> std::result::Result<(), DeadlineExceeded> {
        if self.is_expired() {
            Err(DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

/// Handler for one job type.
///
/// Handlers must be idempotent: delivery is at-least-once and a retried job
/// re-invokes the handler with the same payload.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: JobContext, job: Job) -> HandlerResult;
}

/// Plain async closures are handlers
#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext, job: Job) -> HandlerResult {
        (self)(ctx, job).await
    }
}
