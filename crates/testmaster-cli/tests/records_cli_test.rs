//! Integration tests for the record lifecycle behind `testmaster plan`,
//! `case`, `execution`, `report` and `history`.
//!
//! Each test runs against its own temporary PostgreSQL database.

use std::time::{Duration, Instant};

use uuid::Uuid;

use testmaster_core::confirm::{ConfirmError, DeleteConfirmation, DeleteTarget};
use testmaster_core::records::RecordKind;
use testmaster_core::report::{DashboardStats, ExecutionSummary, history};
use testmaster_core::storage::{PgStorage, Storage};
use testmaster_db::models::{ExecutionStatus, NewTestCase, NewTestExecution, NewTestPlan};
use testmaster_test_utils::{create_test_db, drop_test_db};

async fn seed(storage: &PgStorage, owner: Uuid) -> (Uuid, Uuid) {
    let plan = storage
        .create_plan(&NewTestPlan {
            owner_id: owner,
            title: "Release 2.0".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let case = storage
        .create_case(&NewTestCase {
            owner_id: owner,
            plan_id: Some(plan.id),
            title: "Checkout with saved card".into(),
            generated_by_ai: true,
            ..Default::default()
        })
        .await
        .unwrap();
    (plan.id, case.id)
}

async fn record(storage: &PgStorage, owner: Uuid, plan: Uuid, case: Uuid, status: ExecutionStatus) {
    storage
        .create_execution(&NewTestExecution {
            owner_id: owner,
            plan_id: plan,
            case_id: case,
            status,
            executed_by: owner.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
}

// -----------------------------------------------------------------------
// Reports
// -----------------------------------------------------------------------

#[tokio::test]
async fn report_counts_runs_per_plan() {
    let (pool, db_name) = create_test_db().await;
    let storage = PgStorage::new(pool.clone());
    let owner = Uuid::new_v4();

    let (plan, case) = seed(&storage, owner).await;
    let (other_plan, other_case) = seed(&storage, owner).await;
    record(&storage, owner, plan, case, ExecutionStatus::Passed).await;
    record(&storage, owner, plan, case, ExecutionStatus::Failed).await;
    record(&storage, owner, plan, case, ExecutionStatus::NotTested).await;
    record(&storage, owner, other_plan, other_case, ExecutionStatus::Blocked).await;

    let runs = storage.list_executions(owner, Some(plan), None).await.unwrap();
    let summary = ExecutionSummary::from_executions(&runs);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.not_tested, 1);
    assert_eq!(summary.pass_rate, Some(50.0));

    let stats = DashboardStats::collect(&storage, owner).await.unwrap();
    assert_eq!(stats.plans, 2);
    assert_eq!(stats.cases, 2);
    assert_eq!(stats.ai_cases, 2);
    assert_eq!(stats.executions, 4);
    assert_eq!(stats.summary.blocked, 1);

    // Another user sees none of it.
    let empty = DashboardStats::collect(&storage, Uuid::new_v4()).await.unwrap();
    assert_eq!(empty, DashboardStats::default());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn history_lists_newest_first_and_filters_by_kind() {
    let (pool, db_name) = create_test_db().await;
    let storage = PgStorage::new(pool.clone());
    let owner = Uuid::new_v4();

    let (plan, case) = seed(&storage, owner).await;
    record(&storage, owner, plan, case, ExecutionStatus::Passed).await;

    let all = history(&storage, owner, None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].updated_at >= w[1].updated_at));

    let cases = history(&storage, owner, Some(RecordKind::Case)).await.unwrap();
    assert_eq!(cases.len(), 1);
    assert!(cases[0].generated_by_ai);
    assert_eq!(cases[0].title, "Checkout with saved card");

    pool.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Deletion
// -----------------------------------------------------------------------

#[tokio::test]
async fn confirmed_plan_delete_removes_runs_and_detaches_cases() {
    let (pool, db_name) = create_test_db().await;
    let storage = PgStorage::new(pool.clone());
    let owner = Uuid::new_v4();

    let (plan, case) = seed(&storage, owner).await;
    record(&storage, owner, plan, case, ExecutionStatus::Passed).await;

    let mut confirmation = DeleteConfirmation::new(Duration::from_secs(30));
    let target = DeleteTarget {
        kind: RecordKind::Plan,
        id: plan,
    };
    let armed_at = Instant::now();
    confirmation.arm(target, armed_at);

    // A different record is not confirmed by the armed one, and the
    // confirmation stays armed.
    let wrong = DeleteTarget {
        kind: RecordKind::Case,
        id: case,
    };
    assert_eq!(
        confirmation.confirm(&wrong, armed_at),
        Err(ConfirmError::TargetMismatch)
    );

    let confirmed = confirmation.confirm(&target, armed_at).unwrap();
    assert!(storage.delete_plan(confirmed.id).await.unwrap());

    assert!(storage.get_plan(plan).await.unwrap().is_none());
    assert!(
        storage
            .list_executions(owner, None, None)
            .await
            .unwrap()
            .is_empty()
    );
    let orphan = storage.get_case(case).await.unwrap().unwrap();
    assert_eq!(orphan.plan_id, None);

    // Deleting again reports nothing removed.
    assert!(!storage.delete_plan(plan).await.unwrap());

    pool.close().await;
    drop_test_db(&db_name).await;
}
