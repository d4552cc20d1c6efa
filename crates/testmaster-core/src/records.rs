//! Tagged unions over the three record kinds, and lenient conversion from
//! model output into insertable rows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use testmaster_db::models::{
    CaseType, ExecutionStatus, NewTestCase, NewTestExecution, NewTestPlan, Priority, TestCase,
    TestExecution, TestPlan, TestStep,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Plan,
    Case,
    Execution,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plan => "plan",
            Self::Case => "case",
            Self::Execution => "execution",
        })
    }
}

impl FromStr for RecordKind {
    type Err = RecordKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" | "plans" => Ok(Self::Plan),
            "case" | "cases" => Ok(Self::Case),
            "execution" | "executions" => Ok(Self::Execution),
            other => Err(RecordKindParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordKindParseError(pub String);

impl fmt::Display for RecordKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid record kind: {:?}", self.0)
    }
}

impl std::error::Error for RecordKindParseError {}

/// Generated content that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum GeneratedRecord {
    Plan(NewTestPlan),
    Case(NewTestCase),
    Execution(NewTestExecution),
}

impl GeneratedRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Plan(_) => RecordKind::Plan,
            Self::Case(_) => RecordKind::Case,
            Self::Execution(_) => RecordKind::Execution,
        }
    }

    /// Short human label: the title, or the status for executions.
    pub fn title(&self) -> String {
        match self {
            Self::Plan(p) => p.title.clone(),
            Self::Case(c) => c.title.clone(),
            Self::Execution(e) => format!("execution ({})", e.status),
        }
    }

    /// Stamp ownership and AI provenance.
    pub fn owned_by(mut self, owner_id: Uuid) -> Self {
        match &mut self {
            Self::Plan(p) => {
                p.owner_id = owner_id;
                p.generated_by_ai = true;
            }
            Self::Case(c) => {
                c.owner_id = owner_id;
                c.generated_by_ai = true;
            }
            Self::Execution(e) => {
                e.owner_id = owner_id;
                e.generated_by_ai = true;
            }
        }
        self
    }
}

/// A stored row of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum DomainRecord {
    Plan(TestPlan),
    Case(TestCase),
    Execution(TestExecution),
}

impl DomainRecord {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Plan(p) => p.id,
            Self::Case(c) => c.id,
            Self::Execution(e) => e.id,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Plan(_) => RecordKind::Plan,
            Self::Case(_) => RecordKind::Case,
            Self::Execution(_) => RecordKind::Execution,
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::Plan(p) => p.title.clone(),
            Self::Case(c) => c.title.clone(),
            Self::Execution(e) => format!("execution ({})", e.status),
        }
    }

    pub fn generated_by_ai(&self) -> bool {
        match self {
            Self::Plan(p) => p.generated_by_ai,
            Self::Case(c) => c.generated_by_ai,
            Self::Execution(e) => e.generated_by_ai,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Self::Plan(p) => p.updated_at,
            Self::Case(c) => c.updated_at,
            Self::Execution(e) => e.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Lenient JSON extraction
// ---------------------------------------------------------------------------

/// First of `keys` present in `obj`, rendered as text. Arrays of scalars are
/// joined with newlines; models often return bullet lists for prose fields.
fn text(obj: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(as_text))
        .unwrap_or_default()
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let lines: Vec<String> = items.iter().filter_map(as_text).collect();
            Some(lines.join("\n"))
        }
        Value::Object(_) => Some(v.to_string()),
        Value::Null => None,
    }
}

fn normalized(obj: &Value, keys: &[&str]) -> String {
    text(obj, keys).to_ascii_lowercase().replace([' ', '-'], "_")
}

/// Build a plan from model output. Missing fields become empty strings.
pub fn plan_from_json(obj: &Value) -> NewTestPlan {
    NewTestPlan {
        owner_id: Uuid::nil(),
        title: text(obj, &["title", "name"]),
        description: text(obj, &["description"]),
        objective: text(obj, &["objective", "objectives"]),
        scope: text(obj, &["scope"]),
        approach: text(obj, &["approach", "strategy"]),
        acceptance_criteria: text(obj, &["acceptance_criteria", "acceptanceCriteria"]),
        resources: text(obj, &["resources"]),
        schedule: text(obj, &["schedule", "timeline"]),
        risks: text(obj, &["risks"]),
        generated_by_ai: true,
    }
}

/// Defaults applied when the model omits a case's priority or type.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseDefaults {
    pub plan_id: Option<Uuid>,
    pub priority: Priority,
    pub case_type: CaseType,
}

pub fn case_from_json(obj: &Value, defaults: CaseDefaults) -> NewTestCase {
    let priority = normalized(obj, &["priority"])
        .parse()
        .unwrap_or(defaults.priority);
    let case_type = normalized(obj, &["type", "case_type", "caseType"])
        .parse()
        .unwrap_or(defaults.case_type);

    NewTestCase {
        owner_id: Uuid::nil(),
        plan_id: defaults.plan_id,
        title: text(obj, &["title", "name"]),
        description: text(obj, &["description"]),
        preconditions: text(obj, &["preconditions", "prerequisites"]),
        steps: steps_from_json(obj.get("steps")),
        expected_result: text(obj, &["expected_result", "expectedResult", "expected"]),
        priority,
        case_type,
        generated_by_ai: true,
    }
}

/// Steps may be plain strings or objects; they are renumbered 1..n in the
/// order the model gave unless every step carries a usable number.
fn steps_from_json(steps: Option<&Value>) -> Vec<TestStep> {
    let Some(Value::Array(items)) = steps else {
        return Vec::new();
    };

    let mut numbered = true;
    let mut out: Vec<TestStep> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let fallback = i as i32 + 1;
            match item {
                Value::String(s) => {
                    numbered = false;
                    Some(TestStep {
                        order: fallback,
                        action: s.trim().to_string(),
                        expected_result: String::new(),
                    })
                }
                Value::Object(_) => {
                    let order = ["step_number", "order", "step"]
                        .iter()
                        .find_map(|k| item.get(*k).and_then(Value::as_i64))
                        .and_then(|n| i32::try_from(n).ok());
                    if order.is_none() {
                        numbered = false;
                    }
                    Some(TestStep {
                        order: order.unwrap_or(fallback),
                        action: text(item, &["action", "description", "step_description"]),
                        expected_result: text(item, &["expected_result", "expectedResult", "expected"]),
                    })
                }
                _ => None,
            }
        })
        .collect();

    if numbered {
        out.sort_by_key(|s| s.order);
    } else {
        for (i, step) in out.iter_mut().enumerate() {
            step.order = i as i32 + 1;
        }
    }
    out
}

pub fn execution_from_json(obj: &Value, plan_id: Uuid, case_id: Uuid) -> NewTestExecution {
    let status = match normalized(obj, &["status", "result"]).as_str() {
        "pass" | "passed" | "success" => ExecutionStatus::Passed,
        "fail" | "failed" | "failure" => ExecutionStatus::Failed,
        "blocked" => ExecutionStatus::Blocked,
        _ => ExecutionStatus::NotTested,
    };
    NewTestExecution {
        owner_id: Uuid::nil(),
        plan_id,
        case_id,
        status,
        actual_result: text(obj, &["actual_result", "actualResult"]),
        notes: text(obj, &["notes", "comments"]),
        executed_by: text(obj, &["executed_by", "executedBy"]),
        generated_by_ai: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_kind_accepts_singular_and_plural() {
        assert_eq!("plan".parse::<RecordKind>().unwrap(), RecordKind::Plan);
        assert_eq!("executions".parse::<RecordKind>().unwrap(), RecordKind::Execution);
        assert!("suite".parse::<RecordKind>().is_err());
        for kind in [RecordKind::Plan, RecordKind::Case, RecordKind::Execution] {
            assert_eq!(kind.to_string().parse::<RecordKind>().unwrap(), kind);
        }
    }

    #[test]
    fn plan_fields_are_extracted_leniently() {
        let plan = plan_from_json(&json!({
            "title": "  Checkout  ",
            "objective": "Verify payments",
            "acceptanceCriteria": "All pass",
            "risks": ["Gateway outage", "Currency rounding"],
            "unknown": 1
        }));
        assert_eq!(plan.title, "Checkout");
        assert_eq!(plan.acceptance_criteria, "All pass");
        assert_eq!(plan.risks, "Gateway outage\nCurrency rounding");
        assert_eq!(plan.scope, "");
        assert!(plan.generated_by_ai);
    }

    #[test]
    fn case_uses_defaults_for_unknown_enums() {
        let defaults = CaseDefaults {
            plan_id: Some(Uuid::new_v4()),
            priority: Priority::High,
            case_type: CaseType::Security,
        };
        let case = case_from_json(
            &json!({"title": "Reject bad password", "priority": "urgent-ish"}),
            defaults,
        );
        assert_eq!(case.priority, Priority::High);
        assert_eq!(case.case_type, CaseType::Security);
        assert_eq!(case.plan_id, defaults.plan_id);

        let case = case_from_json(&json!({"priority": "Critical", "type": "Performance"}), defaults);
        assert_eq!(case.priority, Priority::Critical);
        assert_eq!(case.case_type, CaseType::Performance);
    }

    #[test]
    fn numbered_steps_are_sorted() {
        let case = case_from_json(
            &json!({"steps": [
                {"step_number": 2, "action": "Submit", "expected_result": "Saved"},
                {"step_number": 1, "action": "Fill form", "expectedResult": "Valid"}
            ]}),
            CaseDefaults::default(),
        );
        assert_eq!(case.steps[0].action, "Fill form");
        assert_eq!(case.steps[0].expected_result, "Valid");
        assert_eq!(case.steps[1].order, 2);
    }

    #[test]
    fn out_of_range_step_numbers_fall_back_to_position() {
        let case = case_from_json(
            &json!({"steps": [
                {"step_number": 4_294_967_297_i64, "action": "Submit"},
                {"step_number": 1, "action": "Fill form"}
            ]}),
            CaseDefaults::default(),
        );
        let steps: Vec<(i32, &str)> = case
            .steps
            .iter()
            .map(|s| (s.order, s.action.as_str()))
            .collect();
        assert_eq!(steps, vec![(1, "Submit"), (2, "Fill form")]);
    }

    #[test]
    fn mixed_steps_are_renumbered() {
        let case = case_from_json(
            &json!({"steps": ["Open page", {"action": "Click"}, 42]}),
            CaseDefaults::default(),
        );
        let orders: Vec<i32> = case.steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2]);
        assert_eq!(case.steps[1].action, "Click");
    }

    #[test]
    fn execution_status_synonyms() {
        let (p, c) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(
            execution_from_json(&json!({"status": "PASS"}), p, c).status,
            ExecutionStatus::Passed
        );
        assert_eq!(
            execution_from_json(&json!({"status": "Not Tested"}), p, c).status,
            ExecutionStatus::NotTested
        );
        let exec = execution_from_json(&json!({"status": "failed", "actual_result": "500"}), p, c);
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.actual_result, "500");
        assert_eq!((exec.plan_id, exec.case_id), (p, c));
    }

    #[test]
    fn owned_by_stamps_owner_and_provenance() {
        let owner = Uuid::new_v4();
        let record = GeneratedRecord::Plan(NewTestPlan {
            title: "t".into(),
            ..Default::default()
        })
        .owned_by(owner);
        match record {
            GeneratedRecord::Plan(p) => {
                assert_eq!(p.owner_id, owner);
                assert!(p.generated_by_ai);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
