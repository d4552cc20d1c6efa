//! Database query functions for the `app_settings` key/value table.

use anyhow::{Context, Result};
use sqlx::PgPool;

/// Fetch a setting by key.
pub async fn get_setting(pool: &PgPool, key: &str) -> Result<Option<serde_json::Value>> {
    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT value FROM app_settings WHERE key = $1")
            .bind(key)
            .fetch_optional(pool)
            .await
            .with_context(|| format!("failed to fetch setting {key:?}"))?;

    Ok(row.map(|(v,)| v))
}

/// Insert or replace a setting. Last write wins.
pub async fn put_setting(pool: &PgPool, key: &str, value: &serde_json::Value) -> Result<()> {
    sqlx::query(
        "INSERT INTO app_settings (key, value) VALUES ($1, $2) \
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .with_context(|| format!("failed to store setting {key:?}"))?;

    Ok(())
}
