// Workq Infrastructure - SQLite Adapter
// Implements: JobRepository

mod connection;
mod error;
mod job_repository;
mod migration;

pub use connection::{create_pool, is_memory_url};
pub use job_repository::SqliteJobRepository;
pub use migration::run_migrations;
