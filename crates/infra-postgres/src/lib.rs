// Workq Infrastructure - PostgreSQL Adapter
// Implements: JobRepository (FOR UPDATE SKIP LOCKED dequeue)

mod connection;
mod error;
mod job_repository;
mod migration;

pub use connection::create_pool;
pub use job_repository::PgJobRepository;
pub use migration::run_migrations;
