//! Dashboard counts, execution summaries and the activity timeline.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use testmaster_db::models::{ExecutionStatus, TestExecution};

use crate::records::{DomainRecord, RecordKind};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub not_tested: usize,
    /// Percentage of executed runs (everything but `not_tested`) that
    /// passed. `None` when nothing has been executed.
    pub pass_rate: Option<f64>,
}

impl ExecutionSummary {
    pub fn from_executions(executions: &[TestExecution]) -> Self {
        let mut s = Self {
            total: executions.len(),
            ..Default::default()
        };
        for e in executions {
            match e.status {
                ExecutionStatus::Passed => s.passed += 1,
                ExecutionStatus::Failed => s.failed += 1,
                ExecutionStatus::Blocked => s.blocked += 1,
                ExecutionStatus::NotTested => s.not_tested += 1,
            }
        }
        let executed = s.total - s.not_tested;
        if executed > 0 {
            s.pass_rate = Some(s.passed as f64 * 100.0 / executed as f64);
        }
        s
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub plans: usize,
    pub cases: usize,
    pub executions: usize,
    pub ai_plans: usize,
    pub ai_cases: usize,
    pub ai_executions: usize,
    pub summary: ExecutionSummary,
}

impl DashboardStats {
    pub async fn collect(storage: &dyn Storage, owner_id: Uuid) -> Result<Self> {
        let plans = storage.list_plans(owner_id).await?;
        let cases = storage.list_cases(owner_id, None).await?;
        let executions = storage.list_executions(owner_id, None, None).await?;

        Ok(Self {
            plans: plans.len(),
            cases: cases.len(),
            executions: executions.len(),
            ai_plans: plans.iter().filter(|p| p.generated_by_ai).count(),
            ai_cases: cases.iter().filter(|c| c.generated_by_ai).count(),
            ai_executions: executions.iter().filter(|e| e.generated_by_ai).count(),
            summary: ExecutionSummary::from_executions(&executions),
        })
    }
}

/// One line of the activity timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub kind: RecordKind,
    pub id: Uuid,
    pub title: String,
    pub generated_by_ai: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&DomainRecord> for HistoryEntry {
    fn from(record: &DomainRecord) -> Self {
        Self {
            kind: record.kind(),
            id: record.id(),
            title: record.title(),
            generated_by_ai: record.generated_by_ai(),
            updated_at: record.updated_at(),
        }
    }
}

/// Every plan, case and execution of `owner_id`, most recently changed
/// first, optionally restricted to one kind.
pub async fn history(
    storage: &dyn Storage,
    owner_id: Uuid,
    kind: Option<RecordKind>,
) -> Result<Vec<HistoryEntry>> {
    let mut records = Vec::new();
    if kind.is_none_or(|k| k == RecordKind::Plan) {
        records.extend(storage.list_plans(owner_id).await?.into_iter().map(DomainRecord::Plan));
    }
    if kind.is_none_or(|k| k == RecordKind::Case) {
        records.extend(
            storage
                .list_cases(owner_id, None)
                .await?
                .into_iter()
                .map(DomainRecord::Case),
        );
    }
    if kind.is_none_or(|k| k == RecordKind::Execution) {
        records.extend(
            storage
                .list_executions(owner_id, None, None)
                .await?
                .into_iter()
                .map(DomainRecord::Execution),
        );
    }

    let mut entries: Vec<HistoryEntry> = records.iter().map(HistoryEntry::from).collect();
    entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(entries)
}
