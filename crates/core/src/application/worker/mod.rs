// Worker Pool - supervised set of polling workers

pub mod constants;
mod panic_guard;
mod registry;
mod shutdown; // Public for use in other modules

use constants::*;
pub use panic_guard::{guard_join, panic_message, PanicGuardResult};
pub use registry::HandlerRegistry;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::maintenance::CleanupScheduler;
use crate::domain::Job;
use crate::error::{AppError, Result};
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{DequeueOptions, JobContext, JobHandler, JobRepository, TimeProvider};
use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub cleanup_interval: Duration,
    pub cleanup_retention: Duration,
    pub enable_rate_limiting: bool,
    /// Prefix of the diagnostic worker id stamped on dequeued jobs
    pub worker_id_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            cleanup_retention: DEFAULT_CLEANUP_RETENTION,
            enable_rate_limiting: false,
            worker_id_prefix: "worker".to_string(),
        }
    }
}

/// Pool lifecycle: stopped -> running -> stopping -> stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    Stopped,
    Running,
    Stopping,
}

struct Lifecycle {
    status: PoolStatus,
    shutdown: Option<ShutdownSender>,
    handles: Vec<JoinHandle<()>>,
}

/// State shared between the pool handle and its worker tasks
struct PoolInner {
    job_repo: Arc<dyn JobRepository>,
    handlers: HandlerRegistry,
    config: WorkerConfig,
}

/// Worker pool: `worker_count` independent loops polling one backend.
///
/// No lock serializes job execution; the backend's atomic dequeue is what
/// keeps two workers from running the same job.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    time_provider: Arc<dyn TimeProvider>,
    pool_id: String,
}

impl WorkerPool {
    pub fn new(job_repo: Arc<dyn JobRepository>, config: WorkerConfig) -> Self {
        let pool_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            inner: Arc::new(PoolInner {
                job_repo,
                handlers: HandlerRegistry::new(),
                config,
            }),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                status: PoolStatus::Stopped,
                shutdown: None,
                handles: Vec::new(),
            })),
            time_provider: Arc::new(SystemTimeProvider),
            pool_id,
        }
    }

    /// Clock used for cleanup cutoffs
    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    pub fn status(&self) -> PoolStatus {
        self.lock_lifecycle().status
    }

    /// Install the handler for a job type (last registration wins).
    /// Safe before or during `start`.
    pub fn register_handler<H: JobHandler>(&self, job_type: impl Into<String>, handler: H) {
        let job_type = job_type.into();
        debug!(job_type = %job_type, "Registering job handler");
        self.inner.handlers.register(job_type, Arc::new(handler));
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.len()
    }

    /// Spawn `worker_count` worker loops subscribed to `queues`
    /// (empty means every queue).
    ///
    /// The loops exit at their next tick once either `parent` fires or `stop`
    /// is called. After a parent shutdown the pool still reports `Running`
    /// until `stop` joins the finished loops.
    ///
    /// # Errors
    /// - `AppError::AlreadyRunning` if the pool is running or still stopping;
    ///   nothing is spawned in that case
    /// - `AppError::Config` for a zero poll interval
    pub fn start<I, S>(&self, parent: ShutdownToken, queues: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.status != PoolStatus::Stopped {
            return Err(AppError::AlreadyRunning);
        }
        if self.inner.config.poll_interval.is_zero() {
            return Err(AppError::Config(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        let options = DequeueOptions::for_queues(queues);
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let config = &self.inner.config;

        info!(
            worker_count = config.worker_count,
            queues = ?options.queues,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            rate_limiting = config.enable_rate_limiting,
            "Starting worker pool"
        );

        lifecycle.handles = (1..=config.worker_count)
            .map(|n| {
                let worker_id = format!("{}-{}-{}", config.worker_id_prefix, self.pool_id, n);
                tokio::spawn(run_worker(
                    Arc::clone(&self.inner),
                    worker_id,
                    options.clone(),
                    shutdown_rx.clone(),
                    parent.clone(),
                ))
            })
            .collect();
        lifecycle.shutdown = Some(shutdown_tx);
        lifecycle.status = PoolStatus::Running;
        Ok(())
    }

    /// Signal every worker to stop at its next tick and wait for in-flight
    /// jobs to finish, up to `shutdown_timeout`.
    ///
    /// The drain runs in its own task: the pool returns to `Stopped` once the
    /// last worker exits, even when this future is dropped or times out first.
    ///
    /// # Errors
    /// - `AppError::NotRunning` if the pool is not running
    /// - `AppError::ShutdownTimeout` if workers did not drain in time. Running
    ///   handlers are not killed and the pool stays in `Stopping` until they
    ///   return.
    pub async fn stop(&self) -> Result<()> {
        let (shutdown_tx, handles) = {
            let mut lifecycle = self.lock_lifecycle();
            if lifecycle.status != PoolStatus::Running {
                return Err(AppError::NotRunning);
            }
            lifecycle.status = PoolStatus::Stopping;
            (
                lifecycle.shutdown.take(),
                std::mem::take(&mut lifecycle.handles),
            )
        };

        if let Some(tx) = shutdown_tx {
            tx.shutdown();
        }

        let timeout = self.inner.config.shutdown_timeout;
        info!(
            workers = handles.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Stopping worker pool, draining in-flight jobs"
        );

        let lifecycle = Arc::clone(&self.lifecycle);
        let mut drain = tokio::spawn(async move {
            for joined in join_all(handles).await {
                if let Err(e) = joined {
                    error!(error = %e, "Worker task ended abnormally");
                }
            }
            lock_lifecycle(&lifecycle).status = PoolStatus::Stopped;
        });

        match tokio::time::timeout(timeout, &mut drain).await {
            Ok(Ok(())) => {
                info!("Worker pool stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "Worker drain task failed");
                self.lock_lifecycle().status = PoolStatus::Stopped;
                Ok(())
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Worker pool did not drain before shutdown timeout"
                );
                Err(AppError::ShutdownTimeout(timeout))
            }
        }
    }

    /// Spawn the retention sweep (ticks every `cleanup_interval`, purges
    /// finished jobs older than `cleanup_retention`). Independent of
    /// `start`/`stop`; it runs until `shutdown` fires.
    pub fn start_background_cleanup(&self, shutdown: ShutdownToken) -> JoinHandle<()> {
        let scheduler = CleanupScheduler::new(
            Arc::clone(&self.inner.job_repo),
            Arc::clone(&self.time_provider),
            self.inner.config.cleanup_interval,
            self.inner.config.cleanup_retention,
        );
        tokio::spawn(scheduler.run(shutdown))
    }

    /// Run a single poll cycle inline (returns true if a job was claimed).
    ///
    /// This is what each worker does per tick; exposed for deterministic tests
    /// and for callers that drive the queue themselves.
    pub async fn process_next_job(&self, worker_id: &str, options: &DequeueOptions) -> bool {
        self.inner.poll_once(worker_id, options).await
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        lock_lifecycle(&self.lifecycle)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // loops of a pool dropped without `stop` exit at their next tick
        if let Some(tx) = self.lock_lifecycle().shutdown.take() {
            tx.shutdown();
        }
    }
}

fn lock_lifecycle(lifecycle: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    lifecycle.lock().unwrap_or_else(|p| p.into_inner())
}

/// Worker loop: poll on a fixed interval until the pool or the caller shuts down
async fn run_worker(
    inner: Arc<PoolInner>,
    worker_id: String,
    options: DequeueOptions,
    mut shutdown: ShutdownToken,
    mut parent: ShutdownToken,
) {
    info!(worker_id = %worker_id, "Worker started");
    let mut ticker = interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = parent.wait() => break,
            _ = ticker.tick() => {}
        }
        // A job in flight is never interrupted by shutdown; the signal is only
        // observed between ticks.
        inner.poll_once(&worker_id, &options).await;
    }

    info!(worker_id = %worker_id, "Worker stopped");
}

impl PoolInner {
    async fn poll_once(&self, worker_id: &str, options: &DequeueOptions) -> bool {
        let job = match self.job_repo.dequeue(worker_id, options).await {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(e) => {
                error!(worker_id = %worker_id, error = %e, "Dequeue failed, skipping tick");
                return false;
            }
        };

        if self.config.enable_rate_limiting && !self.admit(&job).await {
            let message = format!(
                "{} for organization {} on queue {}",
                RATE_LIMIT_MESSAGE, job.org_id, job.queue_name
            );
            warn!(job_id = %job.id, org_id = %job.org_id, "Job denied by rate limit, requeueing");
            self.fail_job(&job.id, &message).await;
            return true;
        }

        self.execute_job(worker_id, job).await;
        true
    }

    /// Advisory: a backend error admits the job rather than stalling the queue
    async fn admit(&self, job: &Job) -> bool {
        match self
            .job_repo
            .can_process_job(&job.org_id, &job.queue_name)
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Rate limit check failed, admitting job");
                true
            }
        }
    }

    async fn execute_job(&self, worker_id: &str, job: Job) {
        let Some(handler) = self.handlers.get(job.job_type.as_str()) else {
            let message = format!("{}: {}", NO_HANDLER_MESSAGE, job.job_type);
            warn!(job_id = %job.id, job_type = %job.job_type, "No handler registered");
            self.fail_job(&job.id, &message).await;
            return;
        };

        let job_id = job.id.clone();
        let org_id = job.org_id.clone();
        let queue_name = job.queue_name.clone();
        let timeout = self.config.job_timeout;
        let ctx = JobContext::new(worker_id, job.attempt_count, timeout);

        info!(
            job_id = %job_id,
            job_type = %job.job_type,
            attempt = job.attempt_count,
            worker_id = %worker_id,
            "Processing job"
        );
        let started = Instant::now();

        // Own task so a panicking handler cannot take the worker down. The
        // deadline in `ctx` is cooperative: whatever the handler returns is
        // recorded, even past `job_timeout`.
        let task = tokio::spawn(async move { handler.handle(ctx, job).await });
        let outcome = guard_join(task.await);

        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed > timeout {
            warn!(
                job_id = %job_id,
                elapsed_ms,
                timeout_ms = timeout.as_millis() as u64,
                "Job handler ignored its deadline"
            );
        }
        match outcome {
            PanicGuardResult::Success(Ok(result)) => {
                if self.config.enable_rate_limiting {
                    if let Err(e) = self.job_repo.record_job_processed(&org_id, &queue_name).await {
                        warn!(job_id = %job_id, error = %e, "Failed to record processed job");
                    }
                }
                match self.job_repo.complete(&job_id, result).await {
                    Ok(()) => info!(job_id = %job_id, elapsed_ms, "Job completed"),
                    Err(e) => error!(job_id = %job_id, error = %e, "Failed to mark job completed"),
                }
            }
            PanicGuardResult::Success(Err(e)) => {
                warn!(job_id = %job_id, elapsed_ms, error = %e, "Job handler returned error");
                self.fail_job(&job_id, &e.to_string()).await;
            }
            PanicGuardResult::Panicked(msg) => {
                self.fail_job(&job_id, &format!("handler panicked: {}", msg))
                    .await;
            }
            PanicGuardResult::Cancelled => {
                self.fail_job(&job_id, "handler task cancelled").await;
            }
        }
    }

    /// Storage errors are logged; the worker carries on with the next tick
    async fn fail_job(&self, job_id: &str, message: &str) {
        if let Err(e) = self.job_repo.fail(job_id, message).await {
            error!(job_id = %job_id, error = %e, "Failed to record job failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobPayload, JobStatus};
    use crate::port::{EnqueueOptions, HandlerError, HandlerResult, InMemoryJobRepository};
    use std::sync::Mutex as StdMutex;

    fn fast_config(workers: usize) -> WorkerConfig {
        WorkerConfig {
            worker_count: workers,
            poll_interval: Duration::from_millis(10),
            job_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    async fn enqueue(
        repo: &InMemoryJobRepository,
        job_type: &str,
        options: EnqueueOptions,
    ) -> Job {
        repo.enqueue("q", job_type, "org-1", JobPayload::empty(), options)
            .await
            .unwrap()
    }

    fn done() -> HandlerResult {
        Ok(None)
    }

    /// Parent token whose sender is gone, so it never fires
    fn never() -> ShutdownToken {
        shutdown_channel().1
    }

    async fn ok_handler(_ctx: JobContext, job: Job) -> HandlerResult {
        Ok(Some(JobPayload::new(job.id.into_bytes())))
    }

    #[tokio::test]
    async fn test_start_and_stop_guards() {
        let repo = Arc::new(InMemoryJobRepository::default());
        let pool = WorkerPool::new(repo, fast_config(2));

        assert!(matches!(pool.stop().await, Err(AppError::NotRunning)));
        pool.start(never(), ["q"]).unwrap();
        assert_eq!(pool.status(), PoolStatus::Running);
        assert!(matches!(pool.start(never(), ["q"]), Err(AppError::AlreadyRunning)));

        tokio_test::assert_ok!(pool.stop().await);
        assert_eq!(pool.status(), PoolStatus::Stopped);

        // restartable after a clean stop
        pool.start(never(), ["q"]).unwrap();
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_process_next_job_completes_with_result() {
        let repo = Arc::new(InMemoryJobRepository::default());
        let pool = WorkerPool::new(repo.clone(), fast_config(1));
        pool.register_handler("analyze_photo", ok_handler);

        let job = enqueue(&repo, "analyze_photo", EnqueueOptions::new()).await;
        assert!(pool.process_next_job("w-1", &DequeueOptions::any_queue()).await);
        assert!(!pool.process_next_job("w-1", &DequeueOptions::any_queue()).await);

        let done = repo.get_job(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result, Some(JobPayload::new(job.id.into_bytes())));
    }

    #[tokio::test]
    async fn test_missing_handler_fails_job() {
        let repo = Arc::new(InMemoryJobRepository::default());
        let pool = WorkerPool::new(repo.clone(), fast_config(1));

        let job = enqueue(&repo, "unknown_type", EnqueueOptions::new().max_attempts(1)).await;
        pool.process_next_job("w-1", &DequeueOptions::any_queue())
            .await;

        let failed = repo.get_job(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed
            .error_message
            .unwrap()
            .contains("no handler registered"));
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_become_failures() {
        let repo = Arc::new(InMemoryJobRepository::default());
        let pool = WorkerPool::new(repo.clone(), fast_config(1));
        pool.register_handler("bad", |_ctx: JobContext, _job: Job| async move {
            let result: HandlerResult = Err(HandlerError::from("photo not found"));
            result
        });
        pool.register_handler("explodes", |_ctx: JobContext, _job: Job| async move {
            if true {
                panic!("decoder crashed");
            }
            done()
        });

        let bad = enqueue(&repo, "bad", EnqueueOptions::new().max_attempts(1)).await;
        let explodes = enqueue(&repo, "explodes", EnqueueOptions::new().max_attempts(1)).await;
        let any = DequeueOptions::any_queue();
        pool.process_next_job("w-1", &any).await;
        pool.process_next_job("w-1", &any).await;

        let bad = repo.get_job(&bad.id).await.unwrap();
        assert_eq!(bad.status, JobStatus::Failed);
        assert_eq!(bad.error_message.as_deref(), Some("photo not found"));

        let explodes = repo.get_job(&explodes.id).await.unwrap();
        assert_eq!(explodes.status, JobStatus::Failed);
        assert!(explodes
            .error_message
            .unwrap()
            .contains("handler panicked: decoder crashed"));
    }

    #[tokio::test]
    async fn test_deadline_error_from_handler_fails_job() {
        let repo = Arc::new(InMemoryJobRepository::default());
        let config = WorkerConfig {
            job_timeout: Duration::from_millis(50),
            ..fast_config(1)
        };
        let pool = WorkerPool::new(repo.clone(), config);
        pool.register_handler("slow", |ctx: JobContext, _job: Job| async move {
            ctx.expired().await;
            ctx.check()?;
            done()
        });

        let job = enqueue(&repo, "slow", EnqueueOptions::new().max_attempts(1)).await;
        pool.process_next_job("w-1", &DequeueOptions::any_queue())
            .await;

        let failed = repo.get_job(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("job deadline exceeded"));
    }

    #[tokio::test]
    async fn test_handler_past_deadline_is_not_interrupted() {
        let repo = Arc::new(InMemoryJobRepository::default());
        let config = WorkerConfig {
            job_timeout: Duration::from_millis(50),
            ..fast_config(1)
        };
        let pool = WorkerPool::new(repo.clone(), config);
        let finished = Arc::new(StdMutex::new(false));
        let flag = finished.clone();
        pool.register_handler("slow", move |_ctx: JobContext, _job: Job| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                *flag.lock().unwrap() = true;
                done()
            }
        });

        let job = enqueue(&repo, "slow", EnqueueOptions::new().max_attempts(1)).await;
        pool.process_next_job("w-1", &DequeueOptions::any_queue())
            .await;

        assert!(*finished.lock().unwrap());
        let completed = repo.get_job(&job.id).await.unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert_eq!(completed.error_message, None);
    }

    #[tokio::test]
    async fn test_parent_shutdown_ends_worker_loops() {
        let repo = Arc::new(InMemoryJobRepository::default());
        let pool = WorkerPool::new(repo.clone(), fast_config(2));
        pool.register_handler("analyze_photo", ok_handler);

        let (parent_tx, parent) = shutdown_channel();
        pool.start(parent, ["q"]).unwrap();
        parent_tx.shutdown();
        // loops observe the signal at their next tick
        tokio::time::sleep(Duration::from_millis(50)).await;

        let job = enqueue(&repo, "analyze_photo", EnqueueOptions::new()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let untouched = repo.get_job(&job.id).await.unwrap();
        assert_eq!(untouched.status, JobStatus::Pending);

        tokio_test::assert_ok!(pool.stop().await);
        assert_eq!(pool.status(), PoolStatus::Stopped);
    }

    #[tokio::test]
    async fn test_dropped_stop_still_finishes_drain() {
        let repo = Arc::new(InMemoryJobRepository::default());
        let pool = WorkerPool::new(repo.clone(), fast_config(1));
        pool.register_handler("slow", |_ctx: JobContext, _job: Job| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            done()
        });
        let job = enqueue(&repo, "slow", EnqueueOptions::new()).await;

        pool.start(never(), ["q"]).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // caller gives up on stop() while the handler is still running
        assert!(tokio::time::timeout(Duration::from_millis(10), pool.stop())
            .await
            .is_err());
        assert_eq!(pool.status(), PoolStatus::Stopping);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(pool.status(), PoolStatus::Stopped);
        assert_eq!(
            repo.get_job(&job.id).await.unwrap().status,
            JobStatus::Completed
        );

        pool.start(never(), ["q"]).unwrap();
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limited_job_is_requeued_with_backoff() {
        let repo = Arc::new(InMemoryJobRepository::default());
        repo.set_rate_limit("org-1", "q", crate::domain::RateLimit::new(0, 10))
            .await
            .unwrap();
        let config = WorkerConfig {
            enable_rate_limiting: true,
            ..fast_config(1)
        };
        let pool = WorkerPool::new(repo.clone(), config);
        let calls = Arc::new(StdMutex::new(0));
        let counter = calls.clone();
        pool.register_handler("analyze_photo", move |_ctx: JobContext, _job: Job| {
            let counter = counter.clone();
            async move {
                *counter.lock().unwrap() += 1;
                done()
            }
        });

        let job = enqueue(&repo, "analyze_photo", EnqueueOptions::new()).await;
        assert!(pool.process_next_job("w-1", &DequeueOptions::any_queue()).await);

        let requeued = repo.get_job(&job.id).await.unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        assert_eq!(requeued.attempt_count, 1);
        assert!(requeued.error_message.unwrap().contains("rate limit exceeded"));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_successful_job_is_counted_when_rate_limiting() {
        let repo = Arc::new(InMemoryJobRepository::default());
        repo.set_rate_limit("org-1", "q", crate::domain::RateLimit::new(1, 10))
            .await
            .unwrap();
        let config = WorkerConfig {
            enable_rate_limiting: true,
            ..fast_config(1)
        };
        let pool = WorkerPool::new(repo.clone(), config);
        pool.register_handler("analyze_photo", ok_handler);

        enqueue(&repo, "analyze_photo", EnqueueOptions::new()).await;
        pool.process_next_job("w-1", &DequeueOptions::any_queue())
            .await;

        assert!(!repo.can_process_job("org-1", "q").await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_timeout_leaves_pool_stopping() {
        let repo = Arc::new(InMemoryJobRepository::default());
        let config = WorkerConfig {
            shutdown_timeout: Duration::from_millis(50),
            ..fast_config(1)
        };
        let pool = WorkerPool::new(repo.clone(), config);
        pool.register_handler("slow", |_ctx: JobContext, _job: Job| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            done()
        });
        enqueue(&repo, "slow", EnqueueOptions::new()).await;

        pool.start(never(), ["q"]).unwrap();
        // let the worker pick the job up
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(matches!(
            pool.stop().await,
            Err(AppError::ShutdownTimeout(_))
        ));
        assert_eq!(pool.status(), PoolStatus::Stopping);
        assert!(matches!(pool.start(never(), ["q"]), Err(AppError::AlreadyRunning)));

        // the abandoned worker finishes its job, then the pool settles
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(pool.status(), PoolStatus::Stopped);
    }
}
