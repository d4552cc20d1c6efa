//! `testmaster report` and `testmaster history`.

use anyhow::{Context, Result};
use uuid::Uuid;

use testmaster_core::permission::Permission;
use testmaster_core::records::RecordKind;
use testmaster_core::report::{DashboardStats, ExecutionSummary, HistoryEntry, history};

use crate::context::AppContext;
use crate::record_cmds::truncate;

pub async fn run_report(ctx: &AppContext, plan: Option<Uuid>) -> Result<()> {
    let access = ctx.require(Permission::ViewReports).await?;
    let stats = DashboardStats::collect(ctx.storage.as_ref(), access.user_id).await?;

    println!("Records:");
    println!("  Plans:      {:>5}  ({} AI-generated)", stats.plans, stats.ai_plans);
    println!("  Cases:      {:>5}  ({} AI-generated)", stats.cases, stats.ai_cases);
    println!("  Executions: {:>5}  ({} AI-generated)", stats.executions, stats.ai_executions);
    println!();

    let summary = match plan {
        Some(plan_id) => {
            let plan = ctx
                .storage
                .get_plan(plan_id)
                .await?
                .with_context(|| format!("test plan {plan_id} not found"))?;
            println!("Executions for plan \"{}\":", plan.title);
            let runs = ctx
                .storage
                .list_executions(access.user_id, Some(plan_id), None)
                .await?;
            ExecutionSummary::from_executions(&runs)
        }
        None => {
            println!("Executions:");
            stats.summary
        }
    };
    print!("{}", summary_lines(&summary));
    Ok(())
}

pub fn summary_lines(s: &ExecutionSummary) -> String {
    let rate = match s.pass_rate {
        Some(rate) => format!("{rate:.1}%"),
        None => "n/a".to_string(),
    };
    format!(
        "  Passed:     {:>5}\n  Failed:     {:>5}\n  Blocked:    {:>5}\n  Not tested: {:>5}\n  Total:      {:>5}\n  Pass rate:  {rate:>5}\n",
        s.passed, s.failed, s.blocked, s.not_tested, s.total
    )
}

pub async fn run_history(ctx: &AppContext, kind: Option<RecordKind>, limit: usize) -> Result<()> {
    let access = ctx.access().await?;
    let entries = history(ctx.storage.as_ref(), access.user_id, kind).await?;
    if entries.is_empty() {
        println!("No activity yet.");
        return Ok(());
    }
    for entry in entries.iter().take(limit) {
        println!("{}", history_line(entry));
    }
    if entries.len() > limit {
        println!("... {} older entries", entries.len() - limit);
    }
    Ok(())
}

pub fn history_line(entry: &HistoryEntry) -> String {
    format!(
        "{}  {:<9}  {}{}  {}",
        entry.updated_at.format("%Y-%m-%d %H:%M"),
        entry.kind.to_string(),
        if entry.generated_by_ai { "[AI] " } else { "" },
        truncate(&entry.title, 60),
        entry.id,
    )
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn summary_without_runs_has_no_rate() {
        let text = summary_lines(&ExecutionSummary::from_executions(&[]));
        assert!(text.contains("Pass rate:    n/a"), "{text}");
    }

    #[test]
    fn history_line_marks_ai_records() {
        let entry = HistoryEntry {
            kind: RecordKind::Case,
            id: Uuid::nil(),
            title: "Login".into(),
            generated_by_ai: true,
            updated_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap(),
        };
        let line = history_line(&entry);
        assert!(line.starts_with("2026-03-01 09:30  case"));
        assert!(line.contains("[AI] Login"));
    }
}
