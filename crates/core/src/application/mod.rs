// Application Layer - Use Cases and Business Logic

pub mod maintenance;
pub mod producer;
pub mod recovery;
pub mod retry;
pub mod worker;

// Re-exports
pub use maintenance::CleanupScheduler;
pub use producer::JobProducer;
pub use recovery::RecoveryService;
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{
    shutdown_channel, PoolStatus, ShutdownSender, ShutdownToken, WorkerConfig, WorkerPool,
};
