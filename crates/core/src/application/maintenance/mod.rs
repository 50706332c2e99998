// Maintenance Service
// Periodic retention sweep for finished jobs

use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::time_provider::duration_millis;
use crate::port::{JobRepository, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Cleanup scheduler
///
/// Deletes completed/failed jobs whose `completed_at` is older than the
/// retention period. Pending and processing jobs are never touched.
pub struct CleanupScheduler {
    job_repo: Arc<dyn JobRepository>,
    time_provider: Arc<dyn TimeProvider>,
    interval: Duration,
    retention: Duration,
}

impl CleanupScheduler {
    /// Create a new cleanup scheduler
    ///
    /// # Arguments
    /// * `job_repo` - Job repository
    /// * `time_provider` - Clock for the retention cutoff
    /// * `interval` - How often to sweep
    /// * `retention` - How long finished jobs are kept
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        time_provider: Arc<dyn TimeProvider>,
        interval: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            job_repo,
            time_provider,
            interval,
            retention,
        }
    }

    /// Run the sweep loop until `shutdown` fires (spawn in tokio::spawn).
    ///
    /// The first sweep happens one full interval after start.
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_secs = self.retention.as_secs(),
            "Cleanup scheduler started"
        );

        // tokio panics on a zero period
        let mut tick = interval(self.interval.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval fires immediately; skip that one
        tick.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = tick.tick() => {}
            }

            if let Err(e) = self.run_now().await {
                error!(error = %e, "Scheduled cleanup failed");
            }
        }

        info!("Cleanup scheduler stopped");
    }

    /// Purge once (for manual trigger); returns the number of jobs deleted
    pub async fn run_now(&self) -> Result<u64> {
        let cutoff = self
            .time_provider
            .now_millis()
            .saturating_sub(duration_millis(self.retention));

        let purged = self.job_repo.purge_finished(cutoff).await?;
        if purged > 0 {
            info!(purged, cutoff, "Purged finished jobs");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::shutdown_channel;
    use crate::domain::{JobPayload, JobStatus};
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::time_provider::mocks::MockTimeProvider;
    use crate::port::{DequeueOptions, EnqueueOptions, InMemoryJobRepository};

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[tokio::test]
    async fn test_run_now_purges_only_old_finished_jobs() {
        let clock = Arc::new(MockTimeProvider::new(1_000_000));
        let repo = Arc::new(InMemoryJobRepository::new(
            clock.clone(),
            Arc::new(SequentialIdProvider::new("job")),
        ));

        let old = repo
            .enqueue("q", "t", "org", JobPayload::empty(), EnqueueOptions::new())
            .await
            .unwrap();
        repo.dequeue("w", &DequeueOptions::any_queue()).await.unwrap();
        repo.complete(&old.id, None).await.unwrap();

        let waiting = repo
            .enqueue("q", "t", "org", JobPayload::empty(), EnqueueOptions::new())
            .await
            .unwrap();

        clock.advance(8 * DAY);
        let scheduler = CleanupScheduler::new(repo.clone(), clock.clone(), DAY, 7 * DAY);
        assert_eq!(scheduler.run_now().await.unwrap(), 1);

        assert!(repo.get_job(&old.id).await.unwrap_err().is_not_found());
        let waiting = repo.get_job(&waiting.id).await.unwrap();
        assert_eq!(waiting.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let repo = Arc::new(InMemoryJobRepository::default());
        let clock = Arc::new(MockTimeProvider::new(0));
        let scheduler =
            CleanupScheduler::new(repo, clock, Duration::from_millis(10), Duration::ZERO);

        let (tx, token) = shutdown_channel();
        let handle = tokio::spawn(scheduler.run(token));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.shutdown();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
