// Worker pool defaults (no magic values)
use std::time::Duration;

/// Number of concurrent worker loops
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// How often each worker polls for a job
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Per-invocation handler deadline (5 minutes)
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How long Stop waits for in-flight jobs to drain
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Background cleanup tick (1 hour)
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Finished jobs older than this are purged (7 days)
pub const DEFAULT_CLEANUP_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default recovery window for jobs orphaned in processing (5 minutes)
pub const DEFAULT_RECOVERY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Error message prefix for jobs whose type has no handler
pub const NO_HANDLER_MESSAGE: &str = "no handler registered for job type";

/// Error message for jobs denied by admission control
pub const RATE_LIMIT_MESSAGE: &str = "rate limit exceeded";
