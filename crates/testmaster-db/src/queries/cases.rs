//! Database query functions for the `test_cases` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{NewTestCase, TestCase, TestCaseUpdate};

/// Insert a new test case. Steps are stored as a JSONB array.
pub async fn insert_case(pool: &PgPool, new: &NewTestCase) -> Result<TestCase> {
    let case = sqlx::query_as::<_, TestCase>(
        "INSERT INTO test_cases (owner_id, plan_id, title, description, preconditions, steps, \
         expected_result, priority, case_type, generated_by_ai) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING *",
    )
    .bind(new.owner_id)
    .bind(new.plan_id)
    .bind(&new.title)
    .bind(&new.description)
    .bind(&new.preconditions)
    .bind(Json(&new.steps))
    .bind(&new.expected_result)
    .bind(new.priority)
    .bind(new.case_type)
    .bind(new.generated_by_ai)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert case {:?}", new.title))?;

    Ok(case)
}

/// Fetch a case by its ID.
pub async fn get_case(pool: &PgPool, id: Uuid) -> Result<Option<TestCase>> {
    let case = sqlx::query_as::<_, TestCase>("SELECT * FROM test_cases WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch case")?;

    Ok(case)
}

/// List an owner's cases, optionally restricted to one plan, most recently
/// updated first.
pub async fn list_cases(
    pool: &PgPool,
    owner_id: Uuid,
    plan_id: Option<Uuid>,
) -> Result<Vec<TestCase>> {
    let cases = sqlx::query_as::<_, TestCase>(
        "SELECT * FROM test_cases \
         WHERE owner_id = $1 AND ($2::uuid IS NULL OR plan_id = $2) \
         ORDER BY updated_at DESC",
    )
    .bind(owner_id)
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list cases")?;

    Ok(cases)
}

/// Apply a partial update and bump `updated_at`.
pub async fn update_case(
    pool: &PgPool,
    id: Uuid,
    update: &TestCaseUpdate,
) -> Result<Option<TestCase>> {
    let case = sqlx::query_as::<_, TestCase>(
        "UPDATE test_cases SET \
             plan_id = COALESCE($2, plan_id), \
             title = COALESCE($3, title), \
             description = COALESCE($4, description), \
             preconditions = COALESCE($5, preconditions), \
             steps = COALESCE($6, steps), \
             expected_result = COALESCE($7, expected_result), \
             priority = COALESCE($8, priority), \
             case_type = COALESCE($9, case_type), \
             updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(update.plan_id)
    .bind(&update.title)
    .bind(&update.description)
    .bind(&update.preconditions)
    .bind(update.steps.as_ref().map(Json))
    .bind(&update.expected_result)
    .bind(update.priority)
    .bind(update.case_type)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to update case {id}"))?;

    Ok(case)
}

/// Delete a case. Returns `true` if a row was removed.
pub async fn delete_case(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM test_cases WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to delete case {id}"))?;

    Ok(result.rows_affected() > 0)
}
