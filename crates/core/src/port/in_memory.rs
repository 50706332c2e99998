// In-memory JobRepository
// Reference backend held behind a single mutex; used to test the worker pool
// and the queue contract without a database.

use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{
    Job, JobFilter, JobPayload, JobStatus, JobType, QueueStats, RateLimit, RateLimitWindow,
    STATS_WINDOW_MS,
};
use crate::error::{AppError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{DequeueOptions, EnqueueOptions, IdProvider, JobRepository, TimeProvider};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

type LimitKey = (String, String);

#[derive(Default)]
struct State {
    jobs: HashMap<String, Stored>,
    next_seq: u64,
    windows: HashMap<LimitKey, RateLimitWindow>,
    limits: HashMap<LimitKey, RateLimit>,
}

struct Stored {
    // Insertion order, the FIFO tiebreak when created_at collides
    seq: u64,
    job: Job,
}

pub struct InMemoryJobRepository {
    state: Mutex<State>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    retry_policy: RetryPolicy,
    default_limit: RateLimit,
}

impl Default for InMemoryJobRepository {
    fn default() -> Self {
        Self::new(Arc::new(SystemTimeProvider), Arc::new(UuidProvider))
    }
}

impl InMemoryJobRepository {
    pub fn new(time_provider: Arc<dyn TimeProvider>, id_provider: Arc<dyn IdProvider>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            time_provider,
            id_provider,
            retry_policy: RetryPolicy::default(),
            default_limit: RateLimit::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_default_rate_limit(mut self, limit: RateLimit) -> Self {
        self.default_limit = limit;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("in-memory job store mutex poisoned".to_string()))
    }
}

fn key(org_id: &str, queue_name: &str) -> LimitKey {
    (org_id.to_string(), queue_name.to_string())
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn enqueue(
        &self,
        queue_name: &str,
        job_type: &str,
        org_id: &str,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<Job> {
        let now = self.time_provider.now_millis();
        let mut job = Job::new(
            self.id_provider.generate_id(),
            now,
            queue_name,
            JobType::new(job_type),
            org_id,
            payload,
        );
        job.priority = options.priority;
        job.max_attempts = options.max_attempts;
        job.scheduled_at = options.resolve_scheduled_at(now);

        let mut state = self.lock()?;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(
            job.id.clone(),
            Stored {
                seq,
                job: job.clone(),
            },
        );
        Ok(job)
    }

    async fn dequeue(&self, worker_id: &str, options: &DequeueOptions) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();
        let mut state = self.lock()?;

        // priority DESC, created_at ASC, insertion ASC
        let next = state
            .jobs
            .values_mut()
            .filter(|s| s.job.is_eligible(now) && options.accepts(&s.job.queue_name))
            .min_by_key(|s| (std::cmp::Reverse(s.job.priority), s.job.created_at, s.seq));

        match next {
            Some(stored) => {
                stored.job.start(now, worker_id)?;
                debug!(job_id = %stored.job.id, worker_id = %worker_id, "Dequeued job");
                Ok(Some(stored.job.clone()))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, id: &str, result: Option<JobPayload>) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut state = self.lock()?;
        let stored = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| AppError::job_not_found(id))?;
        stored
            .job
            .complete(now, result)
            .map_err(|e| AppError::InvalidState(format!("Cannot complete job {}: {}", id, e)))
    }

    async fn fail(&self, id: &str, error_message: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut state = self.lock()?;
        let stored = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| AppError::job_not_found(id))?;

        let job = &mut stored.job;
        if job.status != JobStatus::Processing {
            return Err(AppError::InvalidState(format!(
                "Cannot fail job {} in status {}",
                id, job.status
            )));
        }

        match self.retry_policy.should_retry(job) {
            RetryDecision::Retry(delay_ms) => {
                job.reschedule(now.saturating_add(delay_ms), error_message)?
            }
            RetryDecision::Failed => job.fail(now, error_message)?,
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.lock()?.jobs.remove(id);
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Job> {
        self.lock()?
            .jobs
            .get(id)
            .map(|s| s.job.clone())
            .ok_or_else(|| AppError::job_not_found(id))
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let state = self.lock()?;
        let mut matching: Vec<&Stored> = state
            .jobs
            .values()
            .filter(|s| filter.matches(&s.job))
            .collect();
        matching.sort_by_key(|s| std::cmp::Reverse((s.job.created_at, s.seq)));

        let offset = filter.page_offset() as usize;
        let limit = filter.page_limit().map_or(usize::MAX, |l| l as usize);
        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|s| s.job.clone())
            .collect())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats> {
        let since = self.time_provider.now_millis() - STATS_WINDOW_MS;
        let state = self.lock()?;

        let mut stats = QueueStats {
            queue_name: queue_name.to_string(),
            ..Default::default()
        };
        let mut durations = Vec::new();

        for job in state
            .jobs
            .values()
            .map(|s| &s.job)
            .filter(|j| j.queue_name == queue_name && j.created_at >= since)
        {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => {
                    stats.completed += 1;
                    if let (Some(start), Some(end)) = (job.started_at, job.completed_at) {
                        durations.push((end - start) as f64);
                    }
                }
                JobStatus::Failed => stats.failed += 1,
            }
        }

        if !durations.is_empty() {
            stats.avg_processing_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        Ok(stats)
    }

    async fn can_process_job(&self, org_id: &str, queue_name: &str) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let state = self.lock()?;
        let k = key(org_id, queue_name);

        let limit = state.limits.get(&k).copied().unwrap_or(self.default_limit);
        let in_window = state.windows.get(&k).map_or(0, |w| w.jobs_counted(now));
        let processing = state
            .jobs
            .values()
            .filter(|s| {
                s.job.status == JobStatus::Processing
                    && s.job.org_id == org_id
                    && s.job.queue_name == queue_name
            })
            .count() as i64;

        Ok(limit.admits(in_window, processing))
    }

    async fn record_job_processed(&self, org_id: &str, queue_name: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut state = self.lock()?;
        state
            .windows
            .entry(key(org_id, queue_name))
            .or_insert_with(|| RateLimitWindow::open(now))
            .record(now);
        Ok(())
    }

    async fn set_rate_limit(
        &self,
        org_id: &str,
        queue_name: &str,
        limit: RateLimit,
    ) -> Result<()> {
        self.lock()?.limits.insert(key(org_id, queue_name), limit);
        Ok(())
    }

    async fn requeue_stale(&self, started_before: i64) -> Result<u64> {
        let mut state = self.lock()?;
        let mut requeued = 0;
        for job in state.jobs.values_mut().map(|s| &mut s.job) {
            if job.status == JobStatus::Processing
                && job.started_at.map_or(true, |t| t < started_before)
            {
                job.status = JobStatus::Pending;
                job.error_message = Some("requeued after worker loss".to_string());
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn purge_finished(&self, completed_before: i64) -> Result<u64> {
        let mut state = self.lock()?;
        let before = state.jobs.len();
        state.jobs.retain(|_, s| {
            !(s.job.status.is_terminal() && s.job.completed_at.map_or(false, |t| t < completed_before))
        });
        Ok((before - state.jobs.len()) as u64)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
