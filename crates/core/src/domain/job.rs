// Job Domain Model

use crate::domain::error::{DomainError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Job ID (UUID v4 string)
pub type JobId = String;

/// Organization (tenant) identifier, used only for rate-limit accounting
pub type OrgId = String;

/// Priority (higher number = dequeued first)
pub type Priority = i32;

/// Job lifecycle status
///
/// ```text
/// pending -> processing -> completed
///               |
///               +-> pending (retry with backoff)
///               +-> failed  (attempts exhausted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs never change again (except diagnostics)
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Job Type (routing key that selects the handler)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobType(String);

impl JobType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque job payload / result blob.
///
/// The queue never looks inside. Handlers decode it into their own
/// typed schema with [`JobPayload::decode`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload(Vec<u8>);

impl JobPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Serialize any value as a JSON blob
    pub fn from_json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_vec(value).map(Self)
    }

    /// Deserialize the blob as JSON into a handler-defined type
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for JobPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Job Entity
///
/// All timestamps are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    // Identity & routing
    pub id: JobId,
    pub queue_name: String,
    pub job_type: JobType,
    pub org_id: OrgId,
    pub payload: JobPayload,

    // Scheduling
    pub priority: Priority,
    pub scheduled_at: i64,
    pub created_at: i64,

    // Execution
    pub status: JobStatus,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub worker_id: Option<String>,
    pub result: Option<JobPayload>,
    pub error_message: Option<String>,
}

impl Job {
    /// Create a new pending job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `queue_name` - Queue the job is routed to
    /// * `job_type` - Handler routing key
    /// * `org_id` - Tenant for rate limiting
    /// * `payload` - Opaque payload
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        queue_name: impl Into<String>,
        job_type: JobType,
        org_id: impl Into<String>,
        payload: JobPayload,
    ) -> Self {
        Self {
            id: id.into(),
            queue_name: queue_name.into(),
            job_type,
            org_id: org_id.into(),
            payload,
            priority: 0,
            scheduled_at: created_at,
            created_at,
            status: JobStatus::Pending,
            attempt_count: 0,
            max_attempts: 3,
            started_at: None,
            completed_at: None,
            worker_id: None,
            result: None,
            error_message: None,
        }
    }

    /// Pending and due at `now_millis`
    pub fn is_eligible(&self, now_millis: i64) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at <= now_millis
    }

    /// pending -> processing (counts one attempt)
    pub fn start(&mut self, now_millis: i64, worker_id: &str) -> Result<()> {
        self.expect_status(JobStatus::Pending, JobStatus::Processing)?;
        self.status = JobStatus::Processing;
        self.attempt_count += 1;
        self.started_at = Some(now_millis);
        self.worker_id = Some(worker_id.to_string());
        Ok(())
    }

    /// processing -> completed
    pub fn complete(&mut self, now_millis: i64, result: Option<JobPayload>) -> Result<()> {
        self.expect_status(JobStatus::Processing, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.completed_at = Some(now_millis);
        self.result = result;
        Ok(())
    }

    /// processing -> pending, eligible again at `retry_at`
    pub fn reschedule(&mut self, retry_at: i64, error: impl Into<String>) -> Result<()> {
        self.expect_status(JobStatus::Processing, JobStatus::Pending)?;
        self.status = JobStatus::Pending;
        self.scheduled_at = retry_at;
        self.error_message = Some(error.into());
        Ok(())
    }

    /// processing -> failed (terminal)
    pub fn fail(&mut self, now_millis: i64, error: impl Into<String>) -> Result<()> {
        self.expect_status(JobStatus::Processing, JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.completed_at = Some(now_millis);
        self.error_message = Some(error.into());
        Ok(())
    }

    fn expect_status(&self, expected: JobStatus, to: JobStatus) -> Result<()> {
        if self.status != expected {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}
