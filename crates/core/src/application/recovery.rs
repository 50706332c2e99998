// Crash recovery: return jobs orphaned in processing to the queue
use crate::application::worker::constants::DEFAULT_RECOVERY_WINDOW;
use crate::port::time_provider::duration_millis;
use crate::port::{JobRepository, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Crash recovery service
///
/// A worker that dies mid-job leaves the row in `processing` forever. On
/// startup, jobs claimed longer ago than the recovery window go back to
/// `pending` with their attempt count untouched. Handlers are idempotent, so
/// a job that was in fact still running elsewhere just runs twice.
pub struct RecoveryService {
    job_repo: Arc<dyn JobRepository>,
    time_provider: Arc<dyn TimeProvider>,
    recovery_window: Duration,
}

impl RecoveryService {
    /// Create a new recovery service
    ///
    /// # Arguments
    /// * `job_repo` - Job repository
    /// * `time_provider` - Time provider
    /// * `recovery_window` - Optional custom recovery window (default: 5 minutes)
    ///
    /// # Example
    /// ```ignore
    /// let recovery = RecoveryService::new(job_repo, time_provider, None);
    /// recovery.recover_orphaned_jobs().await?;
    /// ```
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        time_provider: Arc<dyn TimeProvider>,
        recovery_window: Option<Duration>,
    ) -> Self {
        Self {
            job_repo,
            time_provider,
            recovery_window: recovery_window.unwrap_or(DEFAULT_RECOVERY_WINDOW),
        }
    }

    /// Requeue orphaned jobs; returns how many were recovered
    pub async fn recover_orphaned_jobs(&self) -> crate::error::Result<u64> {
        let cutoff = self
            .time_provider
            .now_millis()
            .saturating_sub(duration_millis(self.recovery_window));

        info!(cutoff = %cutoff, "Starting orphaned job recovery");
        let recovered = self.job_repo.requeue_stale(cutoff).await?;
        info!(recovered_count = %recovered, "Orphaned job recovery complete");

        Ok(recovered)
    }
}
