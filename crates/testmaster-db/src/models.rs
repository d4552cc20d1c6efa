use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Role held by a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Master,
    Admin,
    Manager,
    Tester,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Master => "master",
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Tester => "tester",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(Self::Master),
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "tester" => Ok(Self::Tester),
            other => Err(RoleParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Role`] string.
#[derive(Debug, Clone)]
pub struct RoleParseError(pub String);

impl fmt::Display for RoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid role: {:?}", self.0)
    }
}

impl std::error::Error for RoleParseError {}

// ---------------------------------------------------------------------------

/// Priority of a test case.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = PriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(PriorityParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Priority`] string.
#[derive(Debug, Clone)]
pub struct PriorityParseError(pub String);

impl fmt::Display for PriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid priority: {:?}", self.0)
    }
}

impl std::error::Error for PriorityParseError {}

// ---------------------------------------------------------------------------

/// Category of a test case.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    #[default]
    Functional,
    Integration,
    Performance,
    Security,
    Usability,
}

impl fmt::Display for CaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Functional => "functional",
            Self::Integration => "integration",
            Self::Performance => "performance",
            Self::Security => "security",
            Self::Usability => "usability",
        };
        f.write_str(s)
    }
}

impl FromStr for CaseType {
    type Err = CaseTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "functional" => Ok(Self::Functional),
            "integration" => Ok(Self::Integration),
            "performance" => Ok(Self::Performance),
            "security" => Ok(Self::Security),
            "usability" => Ok(Self::Usability),
            other => Err(CaseTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`CaseType`] string.
#[derive(Debug, Clone)]
pub struct CaseTypeParseError(pub String);

impl fmt::Display for CaseTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid case type: {:?}", self.0)
    }
}

impl std::error::Error for CaseTypeParseError {}

// ---------------------------------------------------------------------------

/// Outcome recorded for a test execution.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Passed,
    Failed,
    Blocked,
    #[default]
    NotTested,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::NotTested => "not_tested",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionStatus {
    type Err = ExecutionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "blocked" => Ok(Self::Blocked),
            "not_tested" => Ok(Self::NotTested),
            other => Err(ExecutionStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ExecutionStatus`] string.
#[derive(Debug, Clone)]
pub struct ExecutionStatusParseError(pub String);

impl fmt::Display for ExecutionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid execution status: {:?}", self.0)
    }
}

impl std::error::Error for ExecutionStatusParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A test plan -- the top-level document describing what gets tested and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TestPlan {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    pub objective: String,
    pub scope: String,
    pub approach: String,
    pub acceptance_criteria: String,
    pub resources: String,
    pub schedule: String,
    pub risks: String,
    pub generated_by_ai: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One step of a test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStep {
    /// 1-based position within the case.
    pub order: i32,
    pub action: String,
    pub expected_result: String,
}

/// A test case, optionally attached to a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TestCase {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub preconditions: String,
    #[sqlx(json)]
    pub steps: Vec<TestStep>,
    pub expected_result: String,
    pub priority: Priority,
    pub case_type: CaseType,
    pub generated_by_ai: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A recorded run of a test case within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TestExecution {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub plan_id: Uuid,
    pub case_id: Uuid,
    pub status: ExecutionStatus,
    pub actual_result: String,
    pub notes: String,
    pub executed_by: String,
    pub executed_at: DateTime<Utc>,
    pub generated_by_ai: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's profile row (role assignment).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored capability flags for a user.
///
/// These are the raw booleans; role overrides are applied by the
/// permission resolver, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PermissionFlags {
    pub manage_users: bool,
    pub manage_plans: bool,
    pub manage_cases: bool,
    pub manage_executions: bool,
    pub view_reports: bool,
    pub use_ai: bool,
}

impl PermissionFlags {
    /// The set granted at account provisioning: everything except user
    /// management.
    pub const fn tester_default() -> Self {
        Self {
            manage_users: false,
            manage_plans: true,
            manage_cases: true,
            manage_executions: true,
            view_reports: true,
            use_ai: true,
        }
    }

    /// No capabilities at all.
    pub const fn none() -> Self {
        Self {
            manage_users: false,
            manage_plans: false,
            manage_cases: false,
            manage_executions: false,
            view_reports: false,
            use_ai: false,
        }
    }
}

impl Default for PermissionFlags {
    fn default() -> Self {
        Self::tester_default()
    }
}

// ---------------------------------------------------------------------------
// Input structs
// ---------------------------------------------------------------------------

/// Fields for inserting a new test plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewTestPlan {
    pub owner_id: Uuid,
    pub title: String,
    pub description: String,
    pub objective: String,
    pub scope: String,
    pub approach: String,
    pub acceptance_criteria: String,
    pub resources: String,
    pub schedule: String,
    pub risks: String,
    pub generated_by_ai: bool,
}

/// Partial update for a test plan. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestPlanUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub objective: Option<String>,
    pub scope: Option<String>,
    pub approach: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub resources: Option<String>,
    pub schedule: Option<String>,
    pub risks: Option<String>,
}

/// Fields for inserting a new test case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewTestCase {
    pub owner_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub preconditions: String,
    pub steps: Vec<TestStep>,
    pub expected_result: String,
    pub priority: Priority,
    pub case_type: CaseType,
    pub generated_by_ai: bool,
}

/// Partial update for a test case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestCaseUpdate {
    pub plan_id: Option<Uuid>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub preconditions: Option<String>,
    pub steps: Option<Vec<TestStep>>,
    pub expected_result: Option<String>,
    pub priority: Option<Priority>,
    pub case_type: Option<CaseType>,
}

/// Fields for inserting a new test execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewTestExecution {
    pub owner_id: Uuid,
    pub plan_id: Uuid,
    pub case_id: Uuid,
    pub status: ExecutionStatus,
    pub actual_result: String,
    pub notes: String,
    pub executed_by: String,
    pub generated_by_ai: bool,
}

/// Partial update for a test execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestExecutionUpdate {
    pub status: Option<ExecutionStatus>,
    pub actual_result: Option<String>,
    pub notes: Option<String>,
    pub executed_by: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_display_roundtrip() {
        let variants = [Role::Master, Role::Admin, Role::Manager, Role::Tester];
        for v in &variants {
            let s = v.to_string();
            let parsed: Role = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn role_invalid() {
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn priority_display_roundtrip() {
        let variants = [
            Priority::Low,
            Priority::Medium,
            Priority::High,
            Priority::Critical,
        ];
        for v in &variants {
            let parsed: Priority = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn priority_invalid() {
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn case_type_display_roundtrip() {
        let variants = [
            CaseType::Functional,
            CaseType::Integration,
            CaseType::Performance,
            CaseType::Security,
            CaseType::Usability,
        ];
        for v in &variants {
            let parsed: CaseType = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn execution_status_uses_snake_case() {
        assert_eq!(ExecutionStatus::NotTested.to_string(), "not_tested");
        assert_eq!(
            "not_tested".parse::<ExecutionStatus>().unwrap(),
            ExecutionStatus::NotTested
        );
        let json = serde_json::to_string(&ExecutionStatus::NotTested).unwrap();
        assert_eq!(json, "\"not_tested\"");
    }

    #[test]
    fn execution_status_invalid() {
        assert!("skipped".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn tester_default_excludes_user_management() {
        let flags = PermissionFlags::tester_default();
        assert!(!flags.manage_users);
        assert!(flags.manage_plans && flags.manage_cases && flags.manage_executions);
        assert!(flags.view_reports && flags.use_ai);
        assert_eq!(PermissionFlags::default(), flags);
    }

    #[test]
    fn new_case_deserializes_with_defaults() {
        let case: NewTestCase = serde_json::from_str(r#"{"title": "Login"}"#).unwrap();
        assert_eq!(case.title, "Login");
        assert_eq!(case.priority, Priority::Medium);
        assert_eq!(case.case_type, CaseType::Functional);
        assert!(case.steps.is_empty());
    }
}
