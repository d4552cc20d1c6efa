//! Database query functions for the `test_plans` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewTestPlan, TestPlan, TestPlanUpdate};

/// Insert a new plan row. Returns the inserted plan with server-generated
/// defaults (id, created_at, updated_at).
pub async fn insert_plan(pool: &PgPool, new: &NewTestPlan) -> Result<TestPlan> {
    let plan = sqlx::query_as::<_, TestPlan>(
        "INSERT INTO test_plans (owner_id, title, description, objective, scope, approach, \
         acceptance_criteria, resources, schedule, risks, generated_by_ai) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(new.owner_id)
    .bind(&new.title)
    .bind(&new.description)
    .bind(&new.objective)
    .bind(&new.scope)
    .bind(&new.approach)
    .bind(&new.acceptance_criteria)
    .bind(&new.resources)
    .bind(&new.schedule)
    .bind(&new.risks)
    .bind(new.generated_by_ai)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert plan {:?}", new.title))?;

    Ok(plan)
}

/// Fetch a plan by its ID.
pub async fn get_plan(pool: &PgPool, id: Uuid) -> Result<Option<TestPlan>> {
    let plan = sqlx::query_as::<_, TestPlan>("SELECT * FROM test_plans WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch plan")?;

    Ok(plan)
}

/// List an owner's plans, most recently updated first.
pub async fn list_plans(pool: &PgPool, owner_id: Uuid) -> Result<Vec<TestPlan>> {
    let plans = sqlx::query_as::<_, TestPlan>(
        "SELECT * FROM test_plans WHERE owner_id = $1 ORDER BY updated_at DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
    .context("failed to list plans")?;

    Ok(plans)
}

/// Apply a partial update and bump `updated_at`.
///
/// Returns `None` when no plan has the given ID.
pub async fn update_plan(
    pool: &PgPool,
    id: Uuid,
    update: &TestPlanUpdate,
) -> Result<Option<TestPlan>> {
    let plan = sqlx::query_as::<_, TestPlan>(
        "UPDATE test_plans SET \
             title = COALESCE($2, title), \
             description = COALESCE($3, description), \
             objective = COALESCE($4, objective), \
             scope = COALESCE($5, scope), \
             approach = COALESCE($6, approach), \
             acceptance_criteria = COALESCE($7, acceptance_criteria), \
             resources = COALESCE($8, resources), \
             schedule = COALESCE($9, schedule), \
             risks = COALESCE($10, risks), \
             updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(&update.title)
    .bind(&update.description)
    .bind(&update.objective)
    .bind(&update.scope)
    .bind(&update.approach)
    .bind(&update.acceptance_criteria)
    .bind(&update.resources)
    .bind(&update.schedule)
    .bind(&update.risks)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to update plan {id}"))?;

    Ok(plan)
}

/// Delete a plan. Returns `true` if a row was removed.
///
/// Cases attached to the plan keep existing with `plan_id` cleared;
/// executions of the plan are removed with it.
pub async fn delete_plan(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM test_plans WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to delete plan {id}"))?;

    Ok(result.rows_affected() > 0)
}
