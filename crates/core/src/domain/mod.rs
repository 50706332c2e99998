// Domain Layer - Pure entities and value types

pub mod error;
pub mod job;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use job::{Job, JobId, JobPayload, JobStatus, JobType, OrgId, Priority};
pub use queue::{
    JobFilter, QueueStats, RateLimit, RateLimitWindow, RATE_LIMIT_WINDOW_MS, STATS_WINDOW_MS,
};
