//! Database query functions for the `user_profiles` and `user_permissions`
//! tables.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{PermissionFlags, Role, UserProfile};

/// Create a profile with the provisioning defaults (`tester` role and the
/// tester permission set). Existing rows are left untouched.
pub async fn provision_user(pool: &PgPool, user_id: Uuid, email: Option<&str>) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query(
        "INSERT INTO user_profiles (user_id, email) VALUES ($1, $2) \
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(email)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("failed to provision profile for {user_id}"))?;

    sqlx::query(
        "INSERT INTO user_permissions (user_id) VALUES ($1) \
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("failed to provision permissions for {user_id}"))?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok(())
}

/// Fetch a user's profile.
pub async fn get_profile(pool: &PgPool, user_id: Uuid) -> Result<Option<UserProfile>> {
    let profile =
        sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch user profile")?;

    Ok(profile)
}

/// Fetch a user's role. `None` when the user has no profile.
pub async fn get_user_role(pool: &PgPool, user_id: Uuid) -> Result<Option<Role>> {
    let role: Option<(Role,)> =
        sqlx::query_as("SELECT role FROM user_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch user role")?;

    Ok(role.map(|(r,)| r))
}

/// Fetch a user's stored permission flags. `None` when no row exists.
pub async fn get_user_permissions(pool: &PgPool, user_id: Uuid) -> Result<Option<PermissionFlags>> {
    let flags = sqlx::query_as::<_, PermissionFlags>(
        "SELECT manage_users, manage_plans, manage_cases, manage_executions, \
                view_reports, use_ai \
         FROM user_permissions WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch user permissions")?;

    Ok(flags)
}

/// Set a user's role, provisioning the profile if needed.
pub async fn set_user_role(pool: &PgPool, user_id: Uuid, role: Role) -> Result<()> {
    provision_user(pool, user_id, None).await?;
    sqlx::query("UPDATE user_profiles SET role = $1, updated_at = now() WHERE user_id = $2")
        .bind(role)
        .bind(user_id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to set role for {user_id}"))?;

    Ok(())
}

/// Overwrite a user's permission flags, provisioning the profile if needed.
pub async fn set_user_permissions(
    pool: &PgPool,
    user_id: Uuid,
    flags: &PermissionFlags,
) -> Result<()> {
    provision_user(pool, user_id, None).await?;
    sqlx::query(
        "UPDATE user_permissions SET \
             manage_users = $2, manage_plans = $3, manage_cases = $4, \
             manage_executions = $5, view_reports = $6, use_ai = $7, \
             updated_at = now() \
         WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(flags.manage_users)
    .bind(flags.manage_plans)
    .bind(flags.manage_cases)
    .bind(flags.manage_executions)
    .bind(flags.view_reports)
    .bind(flags.use_ai)
    .execute(pool)
    .await
    .with_context(|| format!("failed to set permissions for {user_id}"))?;

    Ok(())
}

/// List all profiles, oldest first.
pub async fn list_profiles(pool: &PgPool) -> Result<Vec<UserProfile>> {
    let profiles =
        sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles ORDER BY created_at ASC")
            .fetch_all(pool)
            .await
            .context("failed to list user profiles")?;

    Ok(profiles)
}
