use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use testmaster_db::models::{
    NewTestCase, NewTestExecution, NewTestPlan, PermissionFlags, Role, TestCase, TestCaseUpdate,
    TestExecution, TestExecutionUpdate, TestPlan, TestPlanUpdate, UserProfile,
};
use testmaster_db::queries::{cases, executions, plans, settings, users};

use super::Storage;

/// [`Storage`] over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn list_plans(&self, owner_id: Uuid) -> Result<Vec<TestPlan>> {
        plans::list_plans(&self.pool, owner_id).await
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<TestPlan>> {
        plans::get_plan(&self.pool, id).await
    }

    async fn create_plan(&self, new: &NewTestPlan) -> Result<TestPlan> {
        plans::insert_plan(&self.pool, new).await
    }

    async fn update_plan(&self, id: Uuid, update: &TestPlanUpdate) -> Result<Option<TestPlan>> {
        plans::update_plan(&self.pool, id, update).await
    }

    async fn delete_plan(&self, id: Uuid) -> Result<bool> {
        plans::delete_plan(&self.pool, id).await
    }

    async fn list_cases(&self, owner_id: Uuid, plan_id: Option<Uuid>) -> Result<Vec<TestCase>> {
        cases::list_cases(&self.pool, owner_id, plan_id).await
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<TestCase>> {
        cases::get_case(&self.pool, id).await
    }

    async fn create_case(&self, new: &NewTestCase) -> Result<TestCase> {
        cases::insert_case(&self.pool, new).await
    }

    async fn update_case(&self, id: Uuid, update: &TestCaseUpdate) -> Result<Option<TestCase>> {
        cases::update_case(&self.pool, id, update).await
    }

    async fn delete_case(&self, id: Uuid) -> Result<bool> {
        cases::delete_case(&self.pool, id).await
    }

    async fn list_executions(
        &self,
        owner_id: Uuid,
        plan_id: Option<Uuid>,
        case_id: Option<Uuid>,
    ) -> Result<Vec<TestExecution>> {
        executions::list_executions(&self.pool, owner_id, plan_id, case_id).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<TestExecution>> {
        executions::get_execution(&self.pool, id).await
    }

    async fn create_execution(&self, new: &NewTestExecution) -> Result<TestExecution> {
        executions::insert_execution(&self.pool, new).await
    }

    async fn update_execution(
        &self,
        id: Uuid,
        update: &TestExecutionUpdate,
    ) -> Result<Option<TestExecution>> {
        executions::update_execution(&self.pool, id, update).await
    }

    async fn delete_execution(&self, id: Uuid) -> Result<bool> {
        executions::delete_execution(&self.pool, id).await
    }

    async fn provision_user(&self, user_id: Uuid, email: Option<&str>) -> Result<()> {
        users::provision_user(&self.pool, user_id, email).await
    }

    async fn get_user_role(&self, user_id: Uuid) -> Result<Option<Role>> {
        users::get_user_role(&self.pool, user_id).await
    }

    async fn get_user_permissions(&self, user_id: Uuid) -> Result<Option<PermissionFlags>> {
        users::get_user_permissions(&self.pool, user_id).await
    }

    async fn set_user_role(&self, user_id: Uuid, role: Role) -> Result<()> {
        users::set_user_role(&self.pool, user_id, role).await
    }

    async fn set_user_permissions(&self, user_id: Uuid, flags: &PermissionFlags) -> Result<()> {
        users::set_user_permissions(&self.pool, user_id, flags).await
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>> {
        users::list_profiles(&self.pool).await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        settings::get_setting(&self.pool, key).await
    }

    async fn put_setting(&self, key: &str, value: &Value) -> Result<()> {
        settings::put_setting(&self.pool, key, value).await
    }
}
