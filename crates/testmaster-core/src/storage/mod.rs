//! The persistence seam.
//!
//! Flows, the review session and the permission resolver only see
//! [`Storage`]. [`PgStorage`] is the production backend; [`MemoryStorage`]
//! backs `serve --in-memory` and the test suites.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use testmaster_db::models::{
    NewTestCase, NewTestExecution, NewTestPlan, PermissionFlags, Role, TestCase, TestCaseUpdate,
    TestExecution, TestExecutionUpdate, TestPlan, TestPlanUpdate, UserProfile,
};

use crate::records::{DomainRecord, GeneratedRecord};

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

#[async_trait]
pub trait Storage: Send + Sync {
    // Plans
    async fn list_plans(&self, owner_id: Uuid) -> Result<Vec<TestPlan>>;
    async fn get_plan(&self, id: Uuid) -> Result<Option<TestPlan>>;
    async fn create_plan(&self, new: &NewTestPlan) -> Result<TestPlan>;
    async fn update_plan(&self, id: Uuid, update: &TestPlanUpdate) -> Result<Option<TestPlan>>;
    async fn delete_plan(&self, id: Uuid) -> Result<bool>;

    // Cases
    async fn list_cases(&self, owner_id: Uuid, plan_id: Option<Uuid>) -> Result<Vec<TestCase>>;
    async fn get_case(&self, id: Uuid) -> Result<Option<TestCase>>;
    async fn create_case(&self, new: &NewTestCase) -> Result<TestCase>;
    async fn update_case(&self, id: Uuid, update: &TestCaseUpdate) -> Result<Option<TestCase>>;
    async fn delete_case(&self, id: Uuid) -> Result<bool>;

    // Executions
    async fn list_executions(
        &self,
        owner_id: Uuid,
        plan_id: Option<Uuid>,
        case_id: Option<Uuid>,
    ) -> Result<Vec<TestExecution>>;
    async fn get_execution(&self, id: Uuid) -> Result<Option<TestExecution>>;
    async fn create_execution(&self, new: &NewTestExecution) -> Result<TestExecution>;
    async fn update_execution(
        &self,
        id: Uuid,
        update: &TestExecutionUpdate,
    ) -> Result<Option<TestExecution>>;
    async fn delete_execution(&self, id: Uuid) -> Result<bool>;

    // Users
    /// Create the profile with default role and permissions if absent.
    async fn provision_user(&self, user_id: Uuid, email: Option<&str>) -> Result<()>;
    async fn get_user_role(&self, user_id: Uuid) -> Result<Option<Role>>;
    async fn get_user_permissions(&self, user_id: Uuid) -> Result<Option<PermissionFlags>>;
    async fn set_user_role(&self, user_id: Uuid, role: Role) -> Result<()>;
    async fn set_user_permissions(&self, user_id: Uuid, flags: &PermissionFlags) -> Result<()>;
    async fn list_users(&self) -> Result<Vec<UserProfile>>;

    // Settings
    async fn get_setting(&self, key: &str) -> Result<Option<Value>>;
    async fn put_setting(&self, key: &str, value: &Value) -> Result<()>;
}

// Compile-time assertion: `Storage` must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Storage) {}
};

/// Insert a generated record through the matching `create_*` call.
pub async fn create_record(storage: &dyn Storage, record: &GeneratedRecord) -> Result<DomainRecord> {
    let stored = match record {
        GeneratedRecord::Plan(p) => DomainRecord::Plan(storage.create_plan(p).await?),
        GeneratedRecord::Case(c) => DomainRecord::Case(storage.create_case(c).await?),
        GeneratedRecord::Execution(e) => {
            DomainRecord::Execution(storage.create_execution(e).await?)
        }
    };
    tracing::info!(kind = %stored.kind(), id = %stored.id(), "record persisted");
    Ok(stored)
}
