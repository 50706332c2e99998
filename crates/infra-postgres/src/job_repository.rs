// PostgreSQL JobRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use tracing::{debug, info};
use workq_core::application::retry::{RetryDecision, RetryPolicy};
use workq_core::domain::{
    Job, JobFilter, JobPayload, JobStatus, JobType, QueueStats, RateLimit, RateLimitWindow,
    RATE_LIMIT_WINDOW_MS, STATS_WINDOW_MS,
};
use workq_core::error::{AppError, Result};
use workq_core::port::{
    DequeueOptions, EnqueueOptions, IdProvider, JobRepository, TimeProvider,
};

const REQUEUE_MESSAGE: &str = "requeued after worker loss";

pub struct PgJobRepository {
    pool: PgPool,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    retry_policy: RetryPolicy,
    default_limit: RateLimit,
}

impl PgJobRepository {
    pub fn new(
        pool: PgPool,
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

    pub fn with_default_rate_limit(mut self, limit: RateLimit) -> Self {
        self.default_limit = limit;
        self
    }

    async fn fetch_job(&self, id: &str) -> Result<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(JobRow::into_job).transpose()
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
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
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
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

    /// Rows locked by a concurrent claimer are skipped rather than waited on,
    /// so parallel workers each take a different job in one round trip.
    async fn dequeue(&self, worker_id: &str, options: &DequeueOptions) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();

        let row: Option<JobRow> = sqlx::query_as(
            r#"
            WITH next AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                  AND scheduled_at <= $1
                  AND (cardinality($3::text[]) = 0 OR queue_name = ANY($3::text[]))
                ORDER BY priority DESC, created_at ASC, seq ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'processing',
                attempt_count = jobs.attempt_count + 1,
                started_at = $1,
                worker_id = $2
            FROM next
            WHERE jobs.id = next.id
            RETURNING jobs.*
            "#,
        )
        .bind(now)
        .bind(worker_id)
        .bind(options.queues.as_slice())
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
            "UPDATE jobs SET status = 'completed', completed_at = $1, result = $2 \
             WHERE id = $3 AND status = 'processing'",
        )
        .bind(now)
        .bind(result.map(JobPayload::into_bytes))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        if updated == 0 {
            return match self.fetch_job(id).await? {
                Some(job) => Err(AppError::InvalidState(format!(
                    "Cannot complete job {} in status {}",
                    id, job.status
                ))),
                None => Err(AppError::job_not_found(id)),
            };
        }
        Ok(())
    }

    /// Row-locked read-decide-write in one transaction
    async fn fail(&self, id: &str, error_message: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let job = row
            .ok_or_else(|| AppError::job_not_found(id))?
            .into_job()?;

        if job.status != JobStatus::Processing {
            return Err(AppError::InvalidState(format!(
                "Cannot fail job {} in status {}",
                id, job.status
            )));
        }

        let query = match self.retry_policy.should_retry(&job) {
            RetryDecision::Retry(delay_ms) => sqlx::query(
                "UPDATE jobs SET status = 'pending', scheduled_at = $1, error_message = $2 \
                 WHERE id = $3",
            )
            .bind(now.saturating_add(delay_ms)),
            RetryDecision::Failed => sqlx::query(
                "UPDATE jobs SET status = 'failed', completed_at = $1, error_message = $2 \
                 WHERE id = $3",
            )
            .bind(now),
        };

        query
            .bind(error_message)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
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
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT * FROM jobs WHERE TRUE");

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

        // LIMIT NULL is unbounded
        qb.push(" ORDER BY created_at DESC, seq DESC LIMIT ")
            .push_bind(filter.page_limit())
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
                   CAST(AVG(completed_at - started_at)
                       FILTER (WHERE status = 'completed' AND started_at IS NOT NULL)
                       AS DOUBLE PRECISION)
            FROM jobs
            WHERE queue_name = $1 AND created_at >= $2
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
             WHERE org_id = $1 AND queue_name = $2 AND status = 'processing'",
        )
        .bind(org_id)
        .bind(queue_name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let row: Option<(i64, i64, Option<i64>, Option<i64>)> = sqlx::query_as(
            "SELECT window_start, jobs_in_window, max_jobs_per_hour, max_concurrent_jobs \
             FROM rate_limits WHERE org_id = $1 AND queue_name = $2",
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

    async fn record_job_processed(&self, org_id: &str, queue_name: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        sqlx::query(
            r#"
            INSERT INTO rate_limits (org_id, queue_name, window_start, jobs_in_window)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (org_id, queue_name) DO UPDATE SET
                jobs_in_window = CASE
                    WHEN $3 - rate_limits.window_start > $4 THEN 1
                    ELSE rate_limits.jobs_in_window + 1
                END,
                window_start = CASE
                    WHEN $3 - rate_limits.window_start > $4 THEN $3
                    ELSE rate_limits.window_start
                END
            "#,
        )
        .bind(org_id)
        .bind(queue_name)
        .bind(now)
        .bind(RATE_LIMIT_WINDOW_MS)
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
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (org_id, queue_name) DO UPDATE SET
                max_jobs_per_hour = EXCLUDED.max_jobs_per_hour,
                max_concurrent_jobs = EXCLUDED.max_concurrent_jobs
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
            "UPDATE jobs SET status = 'pending', error_message = $1 \
             WHERE status = 'processing' AND (started_at IS NULL OR started_at < $2)",
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
            "DELETE FROM jobs WHERE status IN ('completed', 'failed') AND completed_at < $1",
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

/// Database row representation (`seq` is ignored)
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

// These run only when WORKQ_TEST_DATABASE_URL points at a scratch database.
// Each test works in its own uniquely named queue so they can share it.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use std::collections::HashSet;
    use std::time::Duration;
    use workq_core::port::id_provider::UuidProvider;
    use workq_core::port::time_provider::mocks::MockTimeProvider;

    const MINUTE: i64 = 60 * 1000;
    const START: i64 = 1_700_000_000_000;

    struct Fixture {
        repo: Arc<PgJobRepository>,
        clock: Arc<MockTimeProvider>,
        queue: String,
    }

    async fn setup_test_db() -> Option<Fixture> {
        let url = std::env::var("WORKQ_TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(MockTimeProvider::new(START));
        let repo = PgJobRepository::new(pool, clock.clone(), Arc::new(UuidProvider));
        Some(Fixture {
            repo: Arc::new(repo),
            clock,
            queue: format!("test-{}", uuid::Uuid::new_v4().simple()),
        })
    }

    impl Fixture {
        async fn enqueue(&self, options: EnqueueOptions) -> Job {
            self.repo
                .enqueue(&self.queue, "analyze_photo", &self.queue, JobPayload::empty(), options)
                .await
                .unwrap()
        }

        fn only_this_queue(&self) -> DequeueOptions {
            DequeueOptions::for_queues([self.queue.clone()])
        }
    }

    #[tokio::test]
    async fn test_dequeue_priority_then_fifo() {
        let Some(fx) = setup_test_db().await else {
            return;
        };
        let low = fx.enqueue(EnqueueOptions::new()).await;
        let high = fx.enqueue(EnqueueOptions::new().priority(5)).await;
        let low_later = fx.enqueue(EnqueueOptions::new()).await;

        let opts = fx.only_this_queue();
        let mut order = Vec::new();
        while let Some(job) = fx.repo.dequeue("w", &opts).await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(order, vec![high.id, low.id, low_later.id]);
    }

    #[tokio::test]
    async fn test_fail_backoff_then_terminal() {
        let Some(fx) = setup_test_db().await else {
            return;
        };
        let job = fx.enqueue(EnqueueOptions::new().max_attempts(2)).await;
        let opts = fx.only_this_queue();

        fx.repo.dequeue("w", &opts).await.unwrap().unwrap();
        fx.repo.fail(&job.id, "boom").await.unwrap();
        let retried = fx.repo.get_job(&job.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.scheduled_at, START + 2 * MINUTE);
        assert!(fx.repo.dequeue("w", &opts).await.unwrap().is_none());

        fx.clock.advance(Duration::from_secs(120));
        fx.repo.dequeue("w", &opts).await.unwrap().unwrap();
        fx.repo.fail(&job.id, "boom again").await.unwrap();

        let failed = fx.repo.get_job(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(matches!(
            fx.repo.complete(&job.id, None).await,
            Err(AppError::InvalidState(_))
        ));
        assert!(matches!(
            fx.repo.fail(&job.id, "late").await,
            Err(AppError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_negative_page_and_far_future_schedule() {
        let Some(fx) = setup_test_db().await else {
            return;
        };
        fx.enqueue(EnqueueOptions::new().delay(Duration::from_secs(u64::MAX / 1000)))
            .await;

        assert!(fx.repo.dequeue("w", &fx.only_this_queue()).await.unwrap().is_none());
        let filter = JobFilter::new().queue(fx.queue.clone());
        assert_eq!(fx.repo.list_jobs(&filter).await.unwrap().len(), 1);
        assert!(fx
            .repo
            .list_jobs(&filter.limit(-1).offset(-3))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let Some(fx) = setup_test_db().await else {
            return;
        };
        let org = fx.queue.as_str();
        fx.repo
            .set_rate_limit(org, org, RateLimit::new(1, 10))
            .await
            .unwrap();

        assert!(fx.repo.can_process_job(org, org).await.unwrap());
        fx.repo.record_job_processed(org, org).await.unwrap();
        assert!(!fx.repo.can_process_job(org, org).await.unwrap());

        fx.clock.advance(Duration::from_secs(60 * 60 + 1));
        assert!(fx.repo.can_process_job(org, org).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dequeue_never_double_claims() {
        let Some(fx) = setup_test_db().await else {
            return;
        };
        for _ in 0..30 {
            fx.enqueue(EnqueueOptions::new()).await;
        }

        let workers = (0..6).map(|n| {
            let repo = Arc::clone(&fx.repo);
            let opts = fx.only_this_queue();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = repo.dequeue(&format!("w-{}", n), &opts).await.unwrap() {
                    claimed.push(job.id);
                }
                claimed
            })
        });

        let mut all = Vec::new();
        for claimed in futures::future::join_all(workers).await {
            all.extend(claimed.unwrap());
        }
        let unique: HashSet<&String> = all.iter().collect();
        assert_eq!(all.len(), 30);
        assert_eq!(unique.len(), 30);
    }
}
