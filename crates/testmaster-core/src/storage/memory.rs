//! Process-local [`Storage`]. Mirrors the PostgreSQL schema's foreign-key
//! behavior: deleting a plan detaches its cases and removes its executions,
//! deleting a case removes its executions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use testmaster_db::models::{
    NewTestCase, NewTestExecution, NewTestPlan, PermissionFlags, Role, TestCase, TestCaseUpdate,
    TestExecution, TestExecutionUpdate, TestPlan, TestPlanUpdate, UserProfile,
};

use super::Storage;

#[derive(Default)]
struct Tables {
    plans: HashMap<Uuid, TestPlan>,
    cases: HashMap<Uuid, TestCase>,
    executions: HashMap<Uuid, TestExecution>,
    profiles: HashMap<Uuid, UserProfile>,
    permissions: HashMap<Uuid, PermissionFlags>,
    settings: HashMap<String, Value>,
}

impl Tables {
    fn provision(&mut self, user_id: Uuid, email: Option<&str>) {
        let now = Utc::now();
        self.profiles.entry(user_id).or_insert_with(|| UserProfile {
            user_id,
            email: email.map(str::to_string),
            role: Role::Tester,
            created_at: now,
            updated_at: now,
        });
        self.permissions
            .entry(user_id)
            .or_insert_with(PermissionFlags::tester_default);
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("storage unavailable");
        }
        self.tables
            .lock()
            .map_err(|_| anyhow::anyhow!("memory storage lock poisoned"))
    }
}

fn newest_first<T>(mut rows: Vec<T>, key: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    rows.sort_by_key(|row| std::cmp::Reverse(key(row)));
    rows
}

#[async_trait]
impl Storage for MemoryStorage {
    // -----------------------------------------------------------------------
    // Plans
    // -----------------------------------------------------------------------

    async fn list_plans(&self, owner_id: Uuid) -> Result<Vec<TestPlan>> {
        let t = self.tables()?;
        let rows = t
            .plans
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |p| p.updated_at))
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<TestPlan>> {
        Ok(self.tables()?.plans.get(&id).cloned())
    }

    async fn create_plan(&self, new: &NewTestPlan) -> Result<TestPlan> {
        let now = Utc::now();
        let plan = TestPlan {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            title: new.title.clone(),
            description: new.description.clone(),
            objective: new.objective.clone(),
            scope: new.scope.clone(),
            approach: new.approach.clone(),
            acceptance_criteria: new.acceptance_criteria.clone(),
            resources: new.resources.clone(),
            schedule: new.schedule.clone(),
            risks: new.risks.clone(),
            generated_by_ai: new.generated_by_ai,
            created_at: now,
            updated_at: now,
        };
        self.tables()?.plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn update_plan(&self, id: Uuid, update: &TestPlanUpdate) -> Result<Option<TestPlan>> {
        let mut t = self.tables()?;
        let Some(plan) = t.plans.get_mut(&id) else {
            return Ok(None);
        };
        let u = update.clone();
        if let Some(v) = u.title {
            plan.title = v;
        }
        if let Some(v) = u.description {
            plan.description = v;
        }
        if let Some(v) = u.objective {
            plan.objective = v;
        }
        if let Some(v) = u.scope {
            plan.scope = v;
        }
        if let Some(v) = u.approach {
            plan.approach = v;
        }
        if let Some(v) = u.acceptance_criteria {
            plan.acceptance_criteria = v;
        }
        if let Some(v) = u.resources {
            plan.resources = v;
        }
        if let Some(v) = u.schedule {
            plan.schedule = v;
        }
        if let Some(v) = u.risks {
            plan.risks = v;
        }
        plan.updated_at = Utc::now();
        Ok(Some(plan.clone()))
    }

    async fn delete_plan(&self, id: Uuid) -> Result<bool> {
        let mut t = self.tables()?;
        if t.plans.remove(&id).is_none() {
            return Ok(false);
        }
        for case in t.cases.values_mut().filter(|c| c.plan_id == Some(id)) {
            case.plan_id = None;
        }
        t.executions.retain(|_, e| e.plan_id != id);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Cases
    // -----------------------------------------------------------------------

    async fn list_cases(&self, owner_id: Uuid, plan_id: Option<Uuid>) -> Result<Vec<TestCase>> {
        let t = self.tables()?;
        let rows = t
            .cases
            .values()
            .filter(|c| c.owner_id == owner_id)
            .filter(|c| plan_id.is_none() || c.plan_id == plan_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |c| c.updated_at))
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<TestCase>> {
        Ok(self.tables()?.cases.get(&id).cloned())
    }

    async fn create_case(&self, new: &NewTestCase) -> Result<TestCase> {
        let mut t = self.tables()?;
        if let Some(plan_id) = new.plan_id.filter(|p| !t.plans.contains_key(p)) {
            bail!("test plan {plan_id} does not exist");
        }
        let now = Utc::now();
        let mut steps = new.steps.clone();
        steps.sort_by_key(|s| s.order);
        let case = TestCase {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            plan_id: new.plan_id,
            title: new.title.clone(),
            description: new.description.clone(),
            preconditions: new.preconditions.clone(),
            steps,
            expected_result: new.expected_result.clone(),
            priority: new.priority,
            case_type: new.case_type,
            generated_by_ai: new.generated_by_ai,
            created_at: now,
            updated_at: now,
        };
        t.cases.insert(case.id, case.clone());
        Ok(case)
    }

    async fn update_case(&self, id: Uuid, update: &TestCaseUpdate) -> Result<Option<TestCase>> {
        let mut t = self.tables()?;
        if let Some(plan_id) = update.plan_id.filter(|p| !t.plans.contains_key(p)) {
            bail!("test plan {plan_id} does not exist");
        }
        let Some(case) = t.cases.get_mut(&id) else {
            return Ok(None);
        };
        let u = update.clone();
        if let Some(v) = u.plan_id {
            case.plan_id = Some(v);
        }
        if let Some(v) = u.title {
            case.title = v;
        }
        if let Some(v) = u.description {
            case.description = v;
        }
        if let Some(v) = u.preconditions {
            case.preconditions = v;
        }
        if let Some(mut v) = u.steps {
            v.sort_by_key(|s| s.order);
            case.steps = v;
        }
        if let Some(v) = u.expected_result {
            case.expected_result = v;
        }
        if let Some(v) = u.priority {
            case.priority = v;
        }
        if let Some(v) = u.case_type {
            case.case_type = v;
        }
        case.updated_at = Utc::now();
        Ok(Some(case.clone()))
    }

    async fn delete_case(&self, id: Uuid) -> Result<bool> {
        let mut t = self.tables()?;
        if t.cases.remove(&id).is_none() {
            return Ok(false);
        }
        t.executions.retain(|_, e| e.case_id != id);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    async fn list_executions(
        &self,
        owner_id: Uuid,
        plan_id: Option<Uuid>,
        case_id: Option<Uuid>,
    ) -> Result<Vec<TestExecution>> {
        let t = self.tables()?;
        let rows = t
            .executions
            .values()
            .filter(|e| e.owner_id == owner_id)
            .filter(|e| plan_id.is_none_or(|p| e.plan_id == p))
            .filter(|e| case_id.is_none_or(|c| e.case_id == c))
            .cloned()
            .collect();
        Ok(newest_first(rows, |e| e.updated_at))
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<TestExecution>> {
        Ok(self.tables()?.executions.get(&id).cloned())
    }

    async fn create_execution(&self, new: &NewTestExecution) -> Result<TestExecution> {
        let mut t = self.tables()?;
        if !t.plans.contains_key(&new.plan_id) {
            bail!("test plan {} does not exist", new.plan_id);
        }
        if !t.cases.contains_key(&new.case_id) {
            bail!("test case {} does not exist", new.case_id);
        }
        let now = Utc::now();
        let execution = TestExecution {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            plan_id: new.plan_id,
            case_id: new.case_id,
            status: new.status,
            actual_result: new.actual_result.clone(),
            notes: new.notes.clone(),
            executed_by: new.executed_by.clone(),
            executed_at: now,
            generated_by_ai: new.generated_by_ai,
            created_at: now,
            updated_at: now,
        };
        t.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn update_execution(
        &self,
        id: Uuid,
        update: &TestExecutionUpdate,
    ) -> Result<Option<TestExecution>> {
        let mut t = self.tables()?;
        let Some(execution) = t.executions.get_mut(&id) else {
            return Ok(None);
        };
        let u = update.clone();
        if let Some(v) = u.status {
            execution.status = v;
        }
        if let Some(v) = u.actual_result {
            execution.actual_result = v;
        }
        if let Some(v) = u.notes {
            execution.notes = v;
        }
        if let Some(v) = u.executed_by {
            execution.executed_by = v;
        }
        execution.updated_at = Utc::now();
        Ok(Some(execution.clone()))
    }

    async fn delete_execution(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables()?.executions.remove(&id).is_some())
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    async fn provision_user(&self, user_id: Uuid, email: Option<&str>) -> Result<()> {
        self.tables()?.provision(user_id, email);
        Ok(())
    }

    async fn get_user_role(&self, user_id: Uuid) -> Result<Option<Role>> {
        Ok(self.tables()?.profiles.get(&user_id).map(|p| p.role))
    }

    async fn get_user_permissions(&self, user_id: Uuid) -> Result<Option<PermissionFlags>> {
        Ok(self.tables()?.permissions.get(&user_id).copied())
    }

    async fn set_user_role(&self, user_id: Uuid, role: Role) -> Result<()> {
        let mut t = self.tables()?;
        t.provision(user_id, None);
        if let Some(profile) = t.profiles.get_mut(&user_id) {
            profile.role = role;
            profile.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_user_permissions(&self, user_id: Uuid, flags: &PermissionFlags) -> Result<()> {
        let mut t = self.tables()?;
        t.provision(user_id, None);
        t.permissions.insert(user_id, *flags);
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>> {
        let mut rows: Vec<UserProfile> = self.tables()?.profiles.values().cloned().collect();
        rows.sort_by_key(|p| p.created_at);
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    async fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.tables()?.settings.get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: &Value) -> Result<()> {
        self.tables()?
            .settings
            .insert(key.to_string(), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testmaster_db::models::{ExecutionStatus, TestStep};

    fn plan(owner: Uuid, title: &str) -> NewTestPlan {
        NewTestPlan {
            owner_id: owner,
            title: title.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn plan_crud_and_ordering() {
        let store = MemoryStorage::new();
        let owner = Uuid::new_v4();
        let a = store.create_plan(&plan(owner, "a")).await.unwrap();
        let b = store.create_plan(&plan(owner, "b")).await.unwrap();
        store.create_plan(&plan(Uuid::new_v4(), "other")).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let updated = store
            .update_plan(
                a.id,
                &TestPlanUpdate {
                    scope: Some("web".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.scope, "web");
        assert_eq!(updated.title, "a");

        let listed: Vec<Uuid> = store
            .list_plans(owner)
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(listed, vec![a.id, b.id]);

        assert!(store.delete_plan(b.id).await.unwrap());
        assert!(!store.delete_plan(b.id).await.unwrap());
        assert!(store.get_plan(b.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_plan_detaches_cases_and_drops_executions() {
        let store = MemoryStorage::new();
        let owner = Uuid::new_v4();
        let p = store.create_plan(&plan(owner, "p")).await.unwrap();
        let c = store
            .create_case(&NewTestCase {
                owner_id: owner,
                plan_id: Some(p.id),
                title: "c".into(),
                steps: vec![
                    TestStep {
                        order: 2,
                        action: "second".into(),
                        expected_result: String::new(),
                    },
                    TestStep {
                        order: 1,
                        action: "first".into(),
                        expected_result: String::new(),
                    },
                ],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(c.steps[0].action, "first");

        store
            .create_execution(&NewTestExecution {
                owner_id: owner,
                plan_id: p.id,
                case_id: c.id,
                status: ExecutionStatus::Passed,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(store.delete_plan(p.id).await.unwrap());
        let c = store.get_case(c.id).await.unwrap().unwrap();
        assert_eq!(c.plan_id, None);
        assert!(store.list_executions(owner, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn execution_requires_existing_parents() {
        let store = MemoryStorage::new();
        let err = store
            .create_execution(&NewTestExecution {
                plan_id: Uuid::new_v4(),
                case_id: Uuid::new_v4(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn users_are_provisioned_as_testers() {
        let store = MemoryStorage::new();
        let user = Uuid::new_v4();
        assert_eq!(store.get_user_role(user).await.unwrap(), None);

        store.provision_user(user, Some("t@example.com")).await.unwrap();
        assert_eq!(store.get_user_role(user).await.unwrap(), Some(Role::Tester));
        assert_eq!(
            store.get_user_permissions(user).await.unwrap(),
            Some(PermissionFlags::tester_default())
        );

        store.set_user_role(user, Role::Manager).await.unwrap();
        let users = store.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role, Role::Manager);
        assert_eq!(users[0].email.as_deref(), Some("t@example.com"));
    }

    #[tokio::test]
    async fn unavailable_storage_fails_every_call() {
        let store = MemoryStorage::new();
        store.set_unavailable(true);
        assert!(store.get_user_role(Uuid::new_v4()).await.is_err());
        assert!(store.create_plan(&NewTestPlan::default()).await.is_err());
        store.set_unavailable(false);
        assert!(store.create_plan(&NewTestPlan::default()).await.is_ok());
    }
}
