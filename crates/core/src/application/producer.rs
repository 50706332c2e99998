// Enqueue Use Case
// Producer-side validation in front of JobRepository::enqueue

use crate::domain::{Job, JobPayload};
use crate::error::{AppError, Result};
use crate::port::{EnqueueOptions, JobRepository};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

pub const MAX_QUEUE_NAME_LEN: usize = 64;

/// Largest accepted payload (256 KiB)
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Validating producer handle, cheap to clone into request handlers
#[derive(Clone)]
pub struct JobProducer {
    job_repo: Arc<dyn JobRepository>,
}

impl JobProducer {
    pub fn new(job_repo: Arc<dyn JobRepository>) -> Self {
        Self { job_repo }
    }

    /// Validate and enqueue a job with an opaque payload
    pub async fn enqueue(
        &self,
        queue_name: &str,
        job_type: &str,
        org_id: &str,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<Job> {
        validate_queue_name(queue_name)?;
        validate_job_type(job_type)?;
        validate_options(&options)?;
        validate_payload(&payload)?;

        let job = self
            .job_repo
            .enqueue(queue_name, job_type, org_id, payload, options)
            .await?;
        debug!(job_id = %job.id, queue = %queue_name, job_type = %job_type, "Job enqueued");
        Ok(job)
    }

    /// Serialize `payload` as JSON and enqueue it
    pub async fn enqueue_json<T: Serialize>(
        &self,
        queue_name: &str,
        job_type: &str,
        org_id: &str,
        payload: &T,
        options: EnqueueOptions,
    ) -> Result<Job> {
        let payload = JobPayload::from_json(payload)?;
        self.enqueue(queue_name, job_type, org_id, payload, options)
            .await
    }
}

/// Queue names: 1..=64 chars of `[A-Za-z0-9_.-]`
pub fn validate_queue_name(queue_name: &str) -> Result<()> {
    if queue_name.is_empty() {
        return Err(AppError::Validation("queue name cannot be empty".to_string()));
    }
    if queue_name.len() > MAX_QUEUE_NAME_LEN {
        return Err(AppError::Validation(format!(
            "queue name too long ({} > {} chars)",
            queue_name.len(),
            MAX_QUEUE_NAME_LEN
        )));
    }
    if !queue_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AppError::Validation(format!(
            "queue name '{}' must be alphanumeric with '_', '-' or '.'",
            queue_name
        )));
    }
    Ok(())
}

fn validate_job_type(job_type: &str) -> Result<()> {
    if job_type.trim().is_empty() {
        return Err(AppError::Validation("job type cannot be empty".to_string()));
    }
    Ok(())
}

fn validate_options(options: &EnqueueOptions) -> Result<()> {
    if options.max_attempts < 1 {
        return Err(AppError::Validation(format!(
            "max_attempts must be at least 1, got {}",
            options.max_attempts
        )));
    }
    Ok(())
}

fn validate_payload(payload: &JobPayload) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(AppError::Validation(format!(
            "payload too large ({} > {} bytes)",
            payload.len(),
            MAX_PAYLOAD_BYTES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::InMemoryJobRepository;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct AnalyzePhoto {
        photo_id: u64,
    }

    fn producer() -> (JobProducer, Arc<InMemoryJobRepository>) {
        let repo = Arc::new(InMemoryJobRepository::default());
        (JobProducer::new(repo.clone()), repo)
    }

    #[test]
    fn test_validate_queue_name() {
        assert!(validate_queue_name("photos.high-priority_1").is_ok());

        let err = validate_queue_name("").unwrap_err();
        assert!(err.to_string().contains("empty"));

        let err = validate_queue_name(&"a".repeat(65)).unwrap_err();
        assert!(err.to_string().contains("too long"));
        assert!(validate_queue_name(&"a".repeat(64)).is_ok());

        let err = validate_queue_name("invalid@queue!").unwrap_err();
        assert!(err.to_string().contains("alphanumeric"));
    }

    #[tokio::test]
    async fn test_enqueue_json_round_trips_payload() {
        let (producer, repo) = producer();
        let job = producer
            .enqueue_json(
                "photos",
                "analyze_photo",
                "org-1",
                &AnalyzePhoto { photo_id: 42 },
                EnqueueOptions::new().priority(5),
            )
            .await
            .unwrap();

        let stored = repo.get_job(&job.id).await.unwrap();
        assert_eq!(stored.priority, 5);
        let decoded: AnalyzePhoto = stored.payload.decode().unwrap();
        assert_eq!(decoded, AnalyzePhoto { photo_id: 42 });
    }

    #[tokio::test]
    async fn test_rejects_invalid_requests_without_enqueueing() {
        let (producer, repo) = producer();

        let zero_attempts = producer
            .enqueue(
                "photos",
                "analyze_photo",
                "org-1",
                JobPayload::empty(),
                EnqueueOptions::new().max_attempts(0),
            )
            .await;
        assert!(matches!(zero_attempts, Err(AppError::Validation(_))));

        let blank_type = producer
            .enqueue("photos", " ", "org-1", JobPayload::empty(), EnqueueOptions::new())
            .await;
        assert!(matches!(blank_type, Err(AppError::Validation(_))));

        let oversized = producer
            .enqueue(
                "photos",
                "analyze_photo",
                "org-1",
                JobPayload::new(vec![0u8; MAX_PAYLOAD_BYTES + 1]),
                EnqueueOptions::new(),
            )
            .await;
        assert!(matches!(oversized, Err(AppError::Validation(_))));

        let stats = repo.queue_stats("photos").await.unwrap();
        assert_eq!(stats.total(), 0);
    }
}
