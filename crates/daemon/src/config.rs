// Daemon configuration from WORKQ_* environment variables

use std::str::FromStr;
use std::time::Duration;
use workq_core::application::worker::constants::DEFAULT_RECOVERY_WINDOW;
use workq_core::application::WorkerConfig;
use workq_core::domain::RateLimit;
use workq_core::error::{AppError, Result};

pub const DEFAULT_DATABASE_URL: &str = "~/.workq/jobs.db";

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub database_url: String,
    /// Empty means every queue
    pub queues: Vec<String>,
    pub worker: WorkerConfig,
    pub rate_limit: RateLimit,
    pub max_backoff: Option<Duration>,
    pub recovery_window: Duration,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = WorkerConfig::default();
        let default_limit = RateLimit::default();

        let worker = WorkerConfig {
            worker_count: parse(&lookup, "WORKQ_WORKER_COUNT")?.unwrap_or(defaults.worker_count),
            poll_interval: positive_millis(&lookup, "WORKQ_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval),
            job_timeout: positive_millis(&lookup, "WORKQ_JOB_TIMEOUT_MS")?
                .unwrap_or(defaults.job_timeout),
            shutdown_timeout: millis(&lookup, "WORKQ_SHUTDOWN_TIMEOUT_MS")?
                .unwrap_or(defaults.shutdown_timeout),
            cleanup_interval: positive_millis(&lookup, "WORKQ_CLEANUP_INTERVAL_MS")?
                .unwrap_or(defaults.cleanup_interval),
            cleanup_retention: millis(&lookup, "WORKQ_CLEANUP_RETENTION_MS")?
                .unwrap_or(defaults.cleanup_retention),
            enable_rate_limiting: flag(&lookup, "WORKQ_RATE_LIMITING")?
                .unwrap_or(defaults.enable_rate_limiting),
            worker_id_prefix: lookup("WORKQ_WORKER_ID_PREFIX")
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.worker_id_prefix),
        };

        let rate_limit = RateLimit::new(
            parse(&lookup, "WORKQ_MAX_JOBS_PER_HOUR")?.unwrap_or(default_limit.max_jobs_per_hour),
            parse(&lookup, "WORKQ_MAX_CONCURRENT_JOBS")?
                .unwrap_or(default_limit.max_concurrent_jobs),
        );

        let queues = lookup("WORKQ_QUEUES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url: lookup("WORKQ_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            queues,
            worker,
            rate_limit,
            max_backoff: positive_millis(&lookup, "WORKQ_MAX_BACKOFF_MS")?,
            recovery_window: millis(&lookup, "WORKQ_RECOVERY_WINDOW_MS")?
                .unwrap_or(DEFAULT_RECOVERY_WINDOW),
        })
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| AppError::Config(format!("{}={:?}: {}", key, raw, e)))
        })
        .transpose()
}

fn millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse::<u64, F>(lookup, key)?.map(Duration::from_millis))
}

fn positive_millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match millis(lookup, key)? {
        Some(d) if d.is_zero() => Err(AppError::Config(format!(
            "{} must be greater than zero",
            key
        ))),
        other => Ok(other),
    }
}

fn flag<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::Config(format!(
                "{}={:?}: expected true or false",
                key, raw
            ))),
        })
        .transpose()
}
