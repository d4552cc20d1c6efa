//! Database query functions for the `test_executions` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewTestExecution, TestExecution, TestExecutionUpdate};

/// Insert a new execution row. `executed_at` defaults to now.
pub async fn insert_execution(pool: &PgPool, new: &NewTestExecution) -> Result<TestExecution> {
    let execution = sqlx::query_as::<_, TestExecution>(
        "INSERT INTO test_executions (owner_id, plan_id, case_id, status, actual_result, \
         notes, executed_by, generated_by_ai) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(new.owner_id)
    .bind(new.plan_id)
    .bind(new.case_id)
    .bind(new.status)
    .bind(&new.actual_result)
    .bind(&new.notes)
    .bind(&new.executed_by)
    .bind(new.generated_by_ai)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert execution for case {}", new.case_id))?;

    Ok(execution)
}

/// Fetch an execution by its ID.
pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<Option<TestExecution>> {
    let execution =
        sqlx::query_as::<_, TestExecution>("SELECT * FROM test_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch execution")?;

    Ok(execution)
}

/// List an owner's executions, optionally filtered by plan and/or case,
/// most recently updated first.
pub async fn list_executions(
    pool: &PgPool,
    owner_id: Uuid,
    plan_id: Option<Uuid>,
    case_id: Option<Uuid>,
) -> Result<Vec<TestExecution>> {
    let executions = sqlx::query_as::<_, TestExecution>(
        "SELECT * FROM test_executions \
         WHERE owner_id = $1 \
           AND ($2::uuid IS NULL OR plan_id = $2) \
           AND ($3::uuid IS NULL OR case_id = $3) \
         ORDER BY updated_at DESC",
    )
    .bind(owner_id)
    .bind(plan_id)
    .bind(case_id)
    .fetch_all(pool)
    .await
    .context("failed to list executions")?;

    Ok(executions)
}

/// Apply a partial update and bump `updated_at`.
pub async fn update_execution(
    pool: &PgPool,
    id: Uuid,
    update: &TestExecutionUpdate,
) -> Result<Option<TestExecution>> {
    let execution = sqlx::query_as::<_, TestExecution>(
        "UPDATE test_executions SET \
             status = COALESCE($2, status), \
             actual_result = COALESCE($3, actual_result), \
             notes = COALESCE($4, notes), \
             executed_by = COALESCE($5, executed_by), \
             updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(update.status)
    .bind(&update.actual_result)
    .bind(&update.notes)
    .bind(&update.executed_by)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to update execution {id}"))?;

    Ok(execution)
}

/// Delete an execution. Returns `true` if a row was removed.
pub async fn delete_execution(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM test_executions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to delete execution {id}"))?;

    Ok(result.rows_affected() > 0)
}
