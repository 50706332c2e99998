// PostgreSQL Connection Pool Setup

use crate::error::map_sqlx_error;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use workq_core::error::Result;

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
        .map_err(map_sqlx_error)
}
