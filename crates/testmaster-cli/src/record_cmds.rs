//! CLI handlers for `testmaster plan`, `case` and `execution`.

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use testmaster_core::confirm::DeleteTarget;
use testmaster_core::permission::Permission;
use testmaster_core::records::RecordKind;
use testmaster_db::models::{NewTestExecution, TestCase, TestExecution, TestPlan};

use crate::context::{AppContext, confirm_delete, parse_id};
use crate::{CaseCommands, ExecutionCommands, PlanCommands};

// -----------------------------------------------------------------------
// Plans
// -----------------------------------------------------------------------

pub async fn run_plan_command(command: PlanCommands, ctx: &AppContext) -> Result<()> {
    match command {
        PlanCommands::List => {
            let access = ctx.access().await?;
            let plans = ctx.storage.list_plans(access.user_id).await?;
            if plans.is_empty() {
                println!("No test plans. Use `testmaster generate plan` to create one.");
                return Ok(());
            }
            print!("{}", plan_table(&plans));
            Ok(())
        }
        PlanCommands::Show { id } => {
            let id = parse_id("plan", &id)?;
            ctx.access().await?;
            let plan = ctx
                .storage
                .get_plan(id)
                .await?
                .with_context(|| format!("test plan {id} not found"))?;
            print_plan(&plan);
            Ok(())
        }
        PlanCommands::Delete { id, yes } => {
            let id = parse_id("plan", &id)?;
            ctx.require(Permission::ManagePlans).await?;
            let plan = ctx
                .storage
                .get_plan(id)
                .await?
                .with_context(|| format!("test plan {id} not found"))?;
            delete(ctx, RecordKind::Plan, id, &plan.title, yes).await
        }
    }
}

pub fn plan_table(plans: &[TestPlan]) -> String {
    let title_w = plans.iter().map(|p| p.title.len()).max().unwrap_or(5).clamp(5, 50);
    let mut out = format!("{:<36}  {:<title_w$}  {:<3}  UPDATED\n", "ID", "TITLE", "AI");
    for p in plans {
        out.push_str(&format!(
            "{:<36}  {:<title_w$}  {:<3}  {}\n",
            p.id,
            truncate(&p.title, title_w),
            if p.generated_by_ai { "yes" } else { "" },
            p.updated_at.format("%Y-%m-%d %H:%M"),
        ));
    }
    out
}

fn print_plan(plan: &TestPlan) {
    println!("Plan:      {}", plan.title);
    println!("ID:        {}", plan.id);
    println!("Generated: {}", if plan.generated_by_ai { "AI" } else { "manual" });
    for (label, value) in [
        ("Description", &plan.description),
        ("Objective", &plan.objective),
        ("Scope", &plan.scope),
        ("Approach", &plan.approach),
        ("Acceptance criteria", &plan.acceptance_criteria),
        ("Resources", &plan.resources),
        ("Schedule", &plan.schedule),
        ("Risks", &plan.risks),
    ] {
        if !value.is_empty() {
            println!();
            println!("{label}:");
            println!("  {}", value.replace('\n', "\n  "));
        }
    }
}

// -----------------------------------------------------------------------
// Cases
// -----------------------------------------------------------------------

pub async fn run_case_command(command: CaseCommands, ctx: &AppContext) -> Result<()> {
    match command {
        CaseCommands::List { plan } => {
            let access = ctx.access().await?;
            let cases = ctx.storage.list_cases(access.user_id, plan).await?;
            if cases.is_empty() {
                println!("No test cases.");
                return Ok(());
            }
            print!("{}", case_table(&cases));
            Ok(())
        }
        CaseCommands::Show { id } => {
            let id = parse_id("case", &id)?;
            ctx.access().await?;
            let case = ctx
                .storage
                .get_case(id)
                .await?
                .with_context(|| format!("test case {id} not found"))?;
            print!("{}", case_details(&case));
            Ok(())
        }
        CaseCommands::Delete { id, yes } => {
            let id = parse_id("case", &id)?;
            ctx.require(Permission::ManageCases).await?;
            let case = ctx
                .storage
                .get_case(id)
                .await?
                .with_context(|| format!("test case {id} not found"))?;
            delete(ctx, RecordKind::Case, id, &case.title, yes).await
        }
    }
}

pub fn case_table(cases: &[TestCase]) -> String {
    let title_w = cases.iter().map(|c| c.title.len()).max().unwrap_or(5).clamp(5, 50);
    let mut out = format!(
        "{:<36}  {:<title_w$}  {:<8}  {:<11}  {:<5}  AI\n",
        "ID", "TITLE", "PRIORITY", "TYPE", "STEPS"
    );
    for c in cases {
        out.push_str(&format!(
            "{:<36}  {:<title_w$}  {:<8}  {:<11}  {:<5}  {}\n",
            c.id,
            truncate(&c.title, title_w),
            c.priority.to_string(),
            c.case_type.to_string(),
            c.steps.len(),
            if c.generated_by_ai { "yes" } else { "" },
        ));
    }
    out
}

pub fn case_details(case: &TestCase) -> String {
    let mut out = format!(
        "Case:     {}\nID:       {}\nPlan:     {}\nPriority: {}\nType:     {}\n",
        case.title,
        case.id,
        case.plan_id.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
        case.priority,
        case.case_type,
    );
    if !case.description.is_empty() {
        out.push_str(&format!("\n{}\n", case.description));
    }
    if !case.preconditions.is_empty() {
        out.push_str(&format!("\nPreconditions: {}\n", case.preconditions));
    }
    if !case.steps.is_empty() {
        out.push_str("\nSteps:\n");
        for step in &case.steps {
            out.push_str(&format!("  {}. {}\n", step.order, step.action));
            if !step.expected_result.is_empty() {
                out.push_str(&format!("     -> {}\n", step.expected_result));
            }
        }
    }
    if !case.expected_result.is_empty() {
        out.push_str(&format!("\nExpected: {}\n", case.expected_result));
    }
    out
}

// -----------------------------------------------------------------------
// Executions
// -----------------------------------------------------------------------

pub async fn run_execution_command(command: ExecutionCommands, ctx: &AppContext) -> Result<()> {
    match command {
        ExecutionCommands::List { plan, case } => {
            let access = ctx.access().await?;
            let executions = ctx.storage.list_executions(access.user_id, plan, case).await?;
            if executions.is_empty() {
                println!("No executions.");
                return Ok(());
            }
            print!("{}", execution_table(&executions));
            Ok(())
        }
        ExecutionCommands::Record {
            case,
            status,
            plan,
            actual,
            notes,
        } => {
            let access = ctx.require(Permission::ManageExecutions).await?;
            let test_case = ctx
                .storage
                .get_case(case)
                .await?
                .with_context(|| format!("test case {case} not found"))?;
            let Some(plan_id) = plan.or(test_case.plan_id) else {
                bail!("test case {case} belongs to no plan; pass --plan");
            };
            let execution = ctx
                .storage
                .create_execution(&NewTestExecution {
                    owner_id: access.user_id,
                    plan_id,
                    case_id: case,
                    status,
                    actual_result: actual,
                    notes,
                    executed_by: access.user_id.to_string(),
                    generated_by_ai: false,
                })
                .await?;
            println!("Execution {} recorded: {}", execution.id, execution.status);
            Ok(())
        }
        ExecutionCommands::Delete { id, yes } => {
            let id = parse_id("execution", &id)?;
            ctx.require(Permission::ManageExecutions).await?;
            let execution = ctx
                .storage
                .get_execution(id)
                .await?
                .with_context(|| format!("test execution {id} not found"))?;
            let label = format!("{} run", execution.status);
            delete(ctx, RecordKind::Execution, id, &label, yes).await
        }
    }
}

pub fn execution_table(executions: &[TestExecution]) -> String {
    let mut out = format!("{:<36}  {:<36}  {:<10}  EXECUTED\n", "ID", "CASE", "STATUS");
    for e in executions {
        out.push_str(&format!(
            "{:<36}  {:<36}  {:<10}  {}\n",
            e.id,
            e.case_id,
            e.status.to_string(),
            e.executed_at.format("%Y-%m-%d %H:%M"),
        ));
    }
    out
}

// -----------------------------------------------------------------------
// Shared
// -----------------------------------------------------------------------

async fn delete(ctx: &AppContext, kind: RecordKind, id: Uuid, label: &str, yes: bool) -> Result<()> {
    let target = DeleteTarget { kind, id };
    let confirmed = confirm_delete(
        target,
        label,
        yes,
        &mut std::io::stdin().lock(),
        &mut std::io::stdout(),
    )?;
    if !confirmed {
        println!("Cancelled.");
        return Ok(());
    }

    let deleted = match kind {
        RecordKind::Plan => ctx.storage.delete_plan(id).await?,
        RecordKind::Case => ctx.storage.delete_case(id).await?,
        RecordKind::Execution => ctx.storage.delete_execution(id).await?,
    };
    if deleted {
        println!("Deleted {kind} {id}.");
    } else {
        println!("{kind} {id} was already gone.");
    }
    Ok(())
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use testmaster_db::models::{CaseType, Priority, TestStep};

    use super::*;

    fn case() -> TestCase {
        let now = Utc::now();
        TestCase {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            plan_id: None,
            title: "Login with valid credentials".into(),
            description: String::new(),
            preconditions: "Account exists".into(),
            steps: vec![
                TestStep {
                    order: 1,
                    action: "Open login page".into(),
                    expected_result: "Form shown".into(),
                },
                TestStep {
                    order: 2,
                    action: "Submit".into(),
                    expected_result: String::new(),
                },
            ],
            expected_result: "Signed in".into(),
            priority: Priority::High,
            case_type: CaseType::Functional,
            generated_by_ai: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 6), "abc...");
        assert_eq!(truncate("ééééééé", 5), "éé...");
    }

    #[test]
    fn case_details_lists_steps_in_order() {
        let text = case_details(&case());
        assert!(text.contains("Plan:     -"));
        assert!(text.contains("Preconditions: Account exists"));
        let first = text.find("1. Open login page").unwrap();
        let second = text.find("2. Submit").unwrap();
        assert!(first < second);
        assert!(text.contains("-> Form shown"));
        assert_eq!(text.matches("->").count(), 1);
    }

    #[test]
    fn case_table_has_one_row_per_case() {
        let table = case_table(&[case(), case()]);
        assert_eq!(table.lines().count(), 3);
        assert!(table.lines().next().unwrap().starts_with("ID"));
        assert!(table.contains("high"));
    }
}
