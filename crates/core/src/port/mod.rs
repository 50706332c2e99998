// Port Layer - Interfaces for external dependencies

pub mod handler;
pub mod id_provider; // For deterministic testing
pub mod in_memory;
pub mod job_repository;
pub mod time_provider;

// Re-exports
pub use handler::{DeadlineExceeded, HandlerError, HandlerResult, JobContext, JobHandler};
pub use id_provider::IdProvider;
pub use in_memory::InMemoryJobRepository;
pub use job_repository::{DequeueOptions, EnqueueOptions, JobRepository, Schedule};
pub use time_provider::TimeProvider;
