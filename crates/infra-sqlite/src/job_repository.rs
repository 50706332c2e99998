// SQLite JobRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info};
use workq_core::application::retry::{RetryDecision, RetryPolicy};
use workq_core::domain::{
    Job, JobFilter, JobPayload, JobStatus, JobType, QueueStats, RateLimit, RateLimitWindow,
    STATS_WINDOW_MS,
};
use workq_core::error::{AppError, Result};
use workq_core::port::{
    DequeueOptions, EnqueueOptions, IdProvider, JobRepository, TimeProvider,
};

const JOB_COLUMNS: &str = "id, queue_name, job_type, org_id, payload, priority, scheduled_at, \
     created_at, status, attempt_count, max_attempts, started_at, completed_at, worker_id, \
     result, error_message";

const REQUEUE_MESSAGE: &str = "requeued after worker loss";

pub struct SqliteJobRepository {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    retry_policy: RetryPolicy,
    default_limit: RateLimit,
}

impl SqliteJobRepository {
    pub fn new(
        pool: SqlitePool,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            pool,
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

    /// Limits applied to (organization, queue) pairs without an override
    pub fn with_default_rate_limit(mut self, limit: RateLimit) -> Self {
        self.default_limit = limit;
        self
    }

    async fn fetch_job(&self, id: &str) -> Result<Option<Job>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        row.map(JobRow::into_job).transpose()
    }

    /// Explain why a guarded `UPDATE ... AND status = 'processing'` touched nothing
    async fn transition_error(&self, id: &str, action: &str) -> AppError {
        match self.fetch_job(id).await {
            Ok(Some(job)) => AppError::InvalidState(format!(
                "Cannot {} job {} in status {}",
                action, id, job.status
            )),
            Ok(None) => AppError::job_not_found(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
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

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue_name, job_type, org_id, payload,
                priority, scheduled_at, created_at, status,
                attempt_count, max_attempts
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.queue_name)
        .bind(job.job_type.as_str())
        .bind(&job.org_id)
        .bind(job.payload.as_bytes())
        .bind(job.priority)
        .bind(job.scheduled_at)
        .bind(job.created_at)
        .bind(job.status.as_str())
        .bind(job.attempt_count)
        .bind(job.max_attempts)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(job_id = %job.id, queue = %queue_name, "Enqueued job");
        Ok(job)
    }

    /// Single-statement claim: the sub-select picks the next eligible row and
    /// the outer UPDATE re-checks `status = 'pending'`, so with SQLite's
    /// single writer two workers can never claim the same row.
    async fn dequeue(&self, worker_id: &str, options: &DequeueOptions) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "UPDATE jobs SET status = 'processing', attempt_count = attempt_count + 1, started_at = ",
        );
        qb.push_bind(now)
            .push(", worker_id = ")
            .push_bind(worker_id)
            .push(
                " WHERE id = (SELECT id FROM jobs WHERE status = 'pending' AND scheduled_at <= ",
            )
            .push_bind(now);

        if !options.queues.is_empty() {
            qb.push(" AND queue_name IN (");
            let mut queues = qb.separated(", ");
            for queue in &options.queues {
                queues.push_bind(queue.as_str());
            }
            queues.push_unseparated(")");
        }

        qb.push(" ORDER BY priority DESC, created_at ASC, rowid ASC LIMIT 1)")
            .push(" AND status = 'pending' RETURNING ")
            .push(JOB_COLUMNS);

        let row: Option<JobRow> = qb
            .build_query_as::<JobRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => {
                let job = row.into_job()?;
                debug!(
                    job_id = %job.id,
                    worker_id = %worker_id,
                    attempt = job.attempt_count,
                    "Dequeued job"
                );
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, id: &str, result: Option<JobPayload>) -> Result<()> {
        let now = self.time_provider.now_millis();
        let updated = sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = ?, result = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(now)
        .bind(result.map(JobPayload::into_bytes))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        if updated == 0 {
            return Err(self.transition_error(id, "complete").await);
        }
        Ok(())
    }

    /// Read-decide-write guarded by `attempt_count`: if another worker moved
    /// the job in between, the UPDATE matches nothing and the call reports
    /// `InvalidState` instead of clobbering the newer state.
    async fn fail(&self, id: &str, error_message: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        let job = self
            .fetch_job(id)
            .await?
            .ok_or_else(|| AppError::job_not_found(id))?;

        if job.status != JobStatus::Processing {
            return Err(AppError::InvalidState(format!(
                "Cannot fail job {} in status {}",
                id, job.status
            )));
        }

        let query = match self.retry_policy.should_retry(&job) {
            RetryDecision::Retry(delay_ms) => sqlx::query(
                "UPDATE jobs SET status = 'pending', scheduled_at = ?, error_message = ? \
                 WHERE id = ? AND status = 'processing' AND attempt_count = ?",
            )
            .bind(now.saturating_add(delay_ms)),
            RetryDecision::Failed => sqlx::query(
                "UPDATE jobs SET status = 'failed', completed_at = ?, error_message = ? \
                 WHERE id = ? AND status = 'processing' AND attempt_count = ?",
            )
            .bind(now),
        };

        let updated = query
            .bind(error_message)
            .bind(id)
            .bind(job.attempt_count)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        if updated == 0 {
            return Err(AppError::InvalidState(format!(
                "Job {} changed concurrently while failing",
                id
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Job> {
        self.fetch_job(id)
            .await?
            .ok_or_else(|| AppError::job_not_found(id))
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT ");
        qb.push(JOB_COLUMNS).push(" FROM jobs WHERE 1 = 1");

        if let Some(queue_name) = &filter.queue_name {
            qb.push(" AND queue_name = ").push_bind(queue_name.as_str());
        }
        if let Some(job_type) = &filter.job_type {
            qb.push(" AND job_type = ").push_bind(job_type.as_str());
        }
        if let Some(org_id) = &filter.org_id {
            qb.push(" AND org_id = ").push_bind(org_id.as_str());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }

        qb.push(" ORDER BY created_at DESC, rowid DESC");
        // SQLite needs a LIMIT before OFFSET; -1 means unbounded
        qb.push(" LIMIT ")
            .push_bind(filter.page_limit().unwrap_or(-1))
            .push(" OFFSET ")
            .push_bind(filter.page_offset());

        let rows: Vec<JobRow> = qb
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats> {
        let since = self.time_provider.now_millis() - STATS_WINDOW_MS;
        let rows: Vec<(String, i64, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT status,
                   COUNT(*),
                   AVG(CASE WHEN status = 'completed' AND started_at IS NOT NULL
                            THEN completed_at - started_at END)
            FROM jobs
            WHERE queue_name = ? AND created_at >= ?
            GROUP BY status
            "#,
        )
        .bind(queue_name)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut stats = QueueStats {
            queue_name: queue_name.to_string(),
            ..Default::default()
        };
        for (status, count, avg_ms) in rows {
            match status.parse::<JobStatus>()? {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Processing => stats.processing = count,
                JobStatus::Completed => {
                    stats.completed = count;
                    stats.avg_processing_ms = avg_ms;
                }
                JobStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }

    async fn can_process_job(&self, org_id: &str, queue_name: &str) -> Result<bool> {
        let now = self.time_provider.now_millis();

        let processing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs \
             WHERE org_id = ? AND queue_name = ? AND status = 'processing'",
        )
        .bind(org_id)
        .bind(queue_name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let row: Option<(i64, i64, Option<i64>, Option<i64>)> = sqlx::query_as(
            "SELECT window_start, jobs_in_window, max_jobs_per_hour, max_concurrent_jobs \
             FROM rate_limits WHERE org_id = ? AND queue_name = ?",
        )
        .bind(org_id)
        .bind(queue_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let (in_window, limit) = match row {
            Some((window_start, jobs_in_window, max_per_hour, max_concurrent)) => {
                let window = RateLimitWindow {
                    window_start,
                    jobs_in_window,
                };
                let limit = RateLimit::new(
                    max_per_hour.unwrap_or(self.default_limit.max_jobs_per_hour),
                    max_concurrent.unwrap_or(self.default_limit.max_concurrent_jobs),
                );
                (window.jobs_counted(now), limit)
            }
            None => (0, self.default_limit),
        };

        Ok(limit.admits(in_window, processing))
    }

    /// Upsert with the window reset folded into the SET expressions (SQLite
    /// evaluates every SET term against the pre-update row).
    async fn record_job_processed(&self, org_id: &str, queue_name: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        sqlx::query(
            r#"
            INSERT INTO rate_limits (org_id, queue_name, window_start, jobs_in_window)
            VALUES (?1, ?2, ?3, 1)
            ON CONFLICT (org_id, queue_name) DO UPDATE SET
                jobs_in_window = CASE
                    WHEN ?3 - rate_limits.window_start > ?4 THEN 1
                    ELSE rate_limits.jobs_in_window + 1
                END,
                window_start = CASE
                    WHEN ?3 - rate_limits.window_start > ?4 THEN ?3
                    ELSE rate_limits.window_start
                END
            "#,
        )
        .bind(org_id)
        .bind(queue_name)
        .bind(now)
        .bind(workq_core::domain::RATE_LIMIT_WINDOW_MS)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn set_rate_limit(
        &self,
        org_id: &str,
        queue_name: &str,
        limit: RateLimit,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rate_limits (org_id, queue_name, max_jobs_per_hour, max_concurrent_jobs)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (org_id, queue_name) DO UPDATE SET
                max_jobs_per_hour = excluded.max_jobs_per_hour,
                max_concurrent_jobs = excluded.max_concurrent_jobs
            "#,
        )
        .bind(org_id)
        .bind(queue_name)
        .bind(limit.max_jobs_per_hour)
        .bind(limit.max_concurrent_jobs)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        info!(
            org_id = %org_id,
            queue = %queue_name,
            max_jobs_per_hour = limit.max_jobs_per_hour,
            max_concurrent_jobs = limit.max_concurrent_jobs,
            "Rate limit updated"
        );
        Ok(())
    }

    async fn requeue_stale(&self, started_before: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', error_message = ? \
             WHERE status = 'processing' AND (started_at IS NULL OR started_at < ?)",
        )
        .bind(REQUEUE_MESSAGE)
        .bind(started_before)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn purge_finished(&self, completed_before: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed') AND completed_at < ?",
        )
        .bind(completed_before)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Database row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    queue_name: String,
    job_type: String,
    org_id: String,
    payload: Vec<u8>,
    priority: i32,
    scheduled_at: i64,
    created_at: i64,
    status: String,
    attempt_count: i32,
    max_attempts: i32,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    worker_id: Option<String>,
    result: Option<Vec<u8>>,
    error_message: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        Ok(Job {
            id: self.id,
            queue_name: self.queue_name,
            job_type: JobType::new(self.job_type),
            org_id: self.org_id,
            payload: JobPayload::new(self.payload),
            priority: self.priority,
            scheduled_at: self.scheduled_at,
            created_at: self.created_at,
            status: self.status.parse()?,
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
            started_at: self.started_at,
            completed_at: self.completed_at,
            worker_id: self.worker_id,
            result: self.result.map(JobPayload::new),
            error_message: self.error_message,
        })
    }
}
