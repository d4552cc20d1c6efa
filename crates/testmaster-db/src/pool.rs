use std::time::Duration;

use anyhow::{Context, Result, bail};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::{debug, info};

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/testmaster-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Tables created by the migrations, in the order `db-init` reports them.
pub const TABLES: [&str; 6] = [
    "user_profiles",
    "user_permissions",
    "test_plans",
    "test_cases",
    "test_executions",
    "app_settings",
];

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a pool sized by `config.max_connections`.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    debug!(max_connections = config.max_connections, "opening database pool");
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.database_url))
}

/// Apply every embedded migration the database has not seen yet.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run database migrations")?;
    info!(migrations = MIGRATOR.migrations.len(), "schema up to date");
    Ok(())
}

/// Create the configured database through the `postgres` maintenance
/// database unless it is already there.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let name = config
        .database_name()
        .context("the database URL does not name a database")?;
    if !is_plain_identifier(name) {
        bail!("database name {name:?} may only contain letters, digits and underscores");
    }

    let maintenance_url = config.maintenance_url();
    let maintenance = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&maintenance_url)
        .await
        .with_context(|| format!("failed to connect to maintenance database at {maintenance_url}"))?;

    let result = create_if_missing(&maintenance, name).await;
    maintenance.close().await;
    result
}

async fn create_if_missing(maintenance: &PgPool, name: &str) -> Result<()> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name)
            .fetch_one(maintenance)
            .await
            .context("failed to query pg_database")?;
    if exists {
        info!(db = name, "database already exists");
        return Ok(());
    }

    // CREATE DATABASE cannot take a bind parameter.
    maintenance
        .execute(format!("CREATE DATABASE {name}").as_str())
        .await
        .with_context(|| format!("failed to create database {name}"))?;
    info!(db = name, "database created");
    Ok(())
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Row count of every table in [`TABLES`].
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let mut counts = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push((table.to_string(), count));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_plain_names_are_created() {
        assert!(is_plain_identifier("testmaster"));
        assert!(is_plain_identifier("testmaster_test_42"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("qa; DROP DATABASE prod"));
        assert!(!is_plain_identifier("qa-db"));
    }
}
