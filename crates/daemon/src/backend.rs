// Storage backend selection by database URL

use crate::config::DaemonConfig;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use workq_core::application::RetryPolicy;
use workq_core::port::id_provider::UuidProvider;
use workq_core::port::time_provider::SystemTimeProvider;
use workq_core::port::{IdProvider, InMemoryJobRepository, JobRepository, TimeProvider};
use workq_infra_postgres::PgJobRepository;
use workq_infra_sqlite::SqliteJobRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Postgres(String),
    Sqlite(String),
    /// Volatile; jobs die with the process
    Memory,
}

impl Backend {
    /// `postgres://` / `postgresql://`, `sqlite:` URLs, `memory`, or a bare
    /// file path (tilde-expanded) for SQLite
    pub fn from_url(url: &str) -> Self {
        if url == "memory" || url == "memory://" {
            Backend::Memory
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Backend::Postgres(url.to_string())
        } else if url.starts_with("sqlite:") {
            Backend::Sqlite(url.to_string())
        } else {
            Backend::Sqlite(format!("sqlite://{}", shellexpand::tilde(url)))
        }
    }
}

pub async fn open_repository(config: &DaemonConfig) -> Result<Arc<dyn JobRepository>> {
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let id_provider: Arc<dyn IdProvider> = Arc::new(UuidProvider);
    let retry_policy = match config.max_backoff {
        Some(max) => RetryPolicy::default().with_max_backoff(max),
        None => RetryPolicy::default(),
    };

    let repo: Arc<dyn JobRepository> = match Backend::from_url(&config.database_url) {
        Backend::Postgres(url) => {
            info!("Initializing PostgreSQL backend...");
            let pool = workq_infra_postgres::create_pool(&url)
                .await
                .context("DB pool creation failed")?;
            workq_infra_postgres::run_migrations(&pool)
                .await
                .context("Migration failed")?;
            Arc::new(
                PgJobRepository::new(pool, time_provider, id_provider)
                    .with_retry_policy(retry_policy)
                    .with_default_rate_limit(config.rate_limit),
            )
        }
        Backend::Sqlite(url) => {
            info!(url = %url, "Initializing SQLite backend...");
            if let Some(parent) = sqlite_file(&url).and_then(Path::parent) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Cannot create {}", parent.display()))?;
            }
            let pool = workq_infra_sqlite::create_pool(&url)
                .await
                .context("DB pool creation failed")?;
            workq_infra_sqlite::run_migrations(&pool)
                .await
                .context("Migration failed")?;
            Arc::new(
                SqliteJobRepository::new(pool, time_provider, id_provider)
                    .with_retry_policy(retry_policy)
                    .with_default_rate_limit(config.rate_limit),
            )
        }
        Backend::Memory => {
            info!("Using in-memory backend (jobs are not persisted)");
            Arc::new(
                InMemoryJobRepository::new(time_provider, id_provider)
                    .with_retry_policy(retry_policy)
                    .with_default_rate_limit(config.rate_limit),
            )
        }
    };

    Ok(repo)
}

/// Filesystem path of a file-backed SQLite URL
fn sqlite_file(url: &str) -> Option<&Path> {
    if workq_infra_sqlite::is_memory_url(url) {
        return None;
    }
    let rest = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    (!path.is_empty()).then(|| Path::new(path))
}
