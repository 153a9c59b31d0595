//! Postgres connection pool construction

use crate::config::DatabaseConfig;
use crate::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Build a connection pool from the database configuration
///
/// The pool is sized so the orchestrator can hand every concurrent file
/// worker its own connection; size `max_connections` at least one above
/// `max_workers`.
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    info!(max_connections = config.max_connections, "Connected to database");
    Ok(pool)
}
