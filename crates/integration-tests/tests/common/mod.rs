//! Shared fixtures: every scenario runs against each backend
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use workq_core::application::{shutdown_channel, ShutdownToken};
use workq_core::domain::{Job, JobStatus};
use workq_core::port::id_provider::UuidProvider;
use workq_core::port::time_provider::mocks::MockTimeProvider;
use workq_core::port::{InMemoryJobRepository, JobRepository};
use workq_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};

pub const START: i64 = 1_700_000_000_000;
pub const MINUTE: i64 = 60 * 1000;

pub struct Backend {
    pub name: &'static str,
    pub repo: Arc<dyn JobRepository>,
    pub clock: Arc<MockTimeProvider>,
}

pub fn memory() -> Backend {
    let clock = Arc::new(MockTimeProvider::new(START));
    Backend {
        name: "memory",
        repo: Arc::new(InMemoryJobRepository::new(clock.clone(), Arc::new(UuidProvider))),
        clock,
    }
}

pub async fn sqlite() -> Backend {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let clock = Arc::new(MockTimeProvider::new(START));
    Backend {
        name: "sqlite",
        repo: Arc::new(SqliteJobRepository::new(pool, clock.clone(), Arc::new(UuidProvider))),
        clock,
    }
}

pub async fn backends() -> Vec<Backend> {
    vec![memory(), sqlite().await]
}

/// Parent token for pools stopped only through `stop()`
pub fn no_shutdown() -> ShutdownToken {
    shutdown_channel().1
}

/// File-backed SQLite database, deleted on drop
pub struct TempDb {
    path: PathBuf,
}

impl TempDb {
    pub fn new() -> Self {
        Self {
            path: std::env::temp_dir().join(format!("workq-it-{}.db", uuid::Uuid::new_v4())),
        }
    }

    pub fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    pub async fn open(&self, clock: Arc<MockTimeProvider>) -> Arc<SqliteJobRepository> {
        let pool = create_pool(&self.url()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        Arc::new(SqliteJobRepository::new(pool, clock, Arc::new(UuidProvider)))
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

/// Poll `get_job` until `done` holds or `timeout` elapses; returns the last state
pub async fn wait_for_job<F>(
    repo: &Arc<dyn JobRepository>,
    id: &str,
    timeout: Duration,
    done: F,
) -> Job
where
    F: Fn(&Job) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = repo.get_job(id).await.unwrap();
        if done(&job) || tokio::time::Instant::now() >= deadline {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn is_terminal(job: &Job) -> bool {
    job.status.is_terminal()
}

pub fn is_processing(job: &Job) -> bool {
    job.status == JobStatus::Processing
}
