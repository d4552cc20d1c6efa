//! `testmaster batch`: generate records from a document, then review them
//! interactively before anything is stored.
//!
//! Review commands (items are numbered from 1):
//!
//! ```text
//! a <n>             approve
//! r <n>             reject
//! g <n> <feedback>  regenerate with feedback
//! v <n>             view the full item
//! l                 list items
//! s                 save approved items
//! q                 quit (q! discards unsaved approvals)
//! ```

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

use testmaster_core::generate::{BatchFlow, BatchKind, BatchRequest};
use testmaster_core::permission::Permission;
use testmaster_core::records::GeneratedRecord;
use testmaster_core::review::{ReviewItem, ReviewSession};
use testmaster_core::storage::Storage;

use crate::context::AppContext;
use crate::record_cmds::truncate;

pub async fn run_batch(
    ctx: &AppContext,
    kind: BatchKind,
    file: &Path,
    plan: Option<Uuid>,
    context: Option<String>,
) -> Result<()> {
    let access = ctx.require(Permission::UseAi).await?;
    let document = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read document {}", file.display()))?;

    println!("Generating {kind} from {}...", file.display());
    let flow = BatchFlow::new(ctx.executor(), ctx.storage.clone());
    let session = flow
        .generate_batch(
            BatchRequest {
                kind,
                document,
                context,
                plan_id: plan,
            },
            access.user_id,
        )
        .await
        .context("batch generation failed")?;

    if session.is_empty() {
        println!("The model produced no {kind}.");
        return Ok(());
    }

    let stdin = std::io::stdin();
    review_loop(
        session,
        &flow,
        ctx.storage.as_ref(),
        &mut stdin.lock(),
        &mut std::io::stdout(),
    )
    .await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewCommand {
    Approve(usize),
    Reject(usize),
    Regenerate(usize, String),
    View(usize),
    List,
    Save,
    Quit { force: bool },
    Help,
}

/// Parse one line of review input. Item numbers are 1-based.
pub fn parse_command(line: &str) -> Result<ReviewCommand, String> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let number = |s: &str| -> Result<usize, String> {
        s.parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("expected an item number, got {s:?}"))
    };

    match verb {
        "a" => number(rest).map(ReviewCommand::Approve),
        "r" => number(rest).map(ReviewCommand::Reject),
        "v" => number(rest).map(ReviewCommand::View),
        "g" => {
            let (n, feedback) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let feedback = feedback.trim();
            if feedback.is_empty() {
                return Err("usage: g <n> <feedback>".to_string());
            }
            Ok(ReviewCommand::Regenerate(number(n)?, feedback.to_string()))
        }
        "l" => Ok(ReviewCommand::List),
        "s" => Ok(ReviewCommand::Save),
        "q" => Ok(ReviewCommand::Quit { force: false }),
        "q!" => Ok(ReviewCommand::Quit { force: true }),
        "h" | "?" | "" => Ok(ReviewCommand::Help),
        other => Err(format!("unknown command {other:?}; type h for help")),
    }
}

/// Drive a review session from `input` until the operator quits or input
/// ends. Returns the session in its final state.
pub async fn review_loop(
    mut session: ReviewSession,
    flow: &BatchFlow,
    storage: &dyn Storage,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<ReviewSession> {
    write_items(&session, out)?;
    writeln!(out, "Type h for help.")?;

    loop {
        write!(out, "review> ")?;
        out.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            if !session.is_resolved() {
                writeln!(out, "Input closed; undecided items were left pending.")?;
            }
            if session.has_unsaved_approvals() {
                writeln!(out, "Input closed; approved items were not saved.")?;
            }
            break;
        }

        let command = match parse_command(&line) {
            Ok(c) => c,
            Err(msg) => {
                writeln!(out, "{msg}")?;
                continue;
            }
        };

        match command {
            ReviewCommand::Approve(n) | ReviewCommand::Reject(n) | ReviewCommand::View(n)
                if n > session.items().len() =>
            {
                writeln!(out, "no item {n}; there are {}", session.items().len())?;
            }
            ReviewCommand::Regenerate(n, _) if n > session.items().len() => {
                writeln!(out, "no item {n}; there are {}", session.items().len())?;
            }
            ReviewCommand::Approve(n) => {
                let id = session.items()[n - 1].id;
                match session.approve(id) {
                    Ok(_) => writeln!(out, "{n}: approved")?,
                    Err(e) => writeln!(out, "{n}: {e}")?,
                }
            }
            ReviewCommand::Reject(n) => {
                let id = session.items()[n - 1].id;
                match session.reject(id) {
                    Ok(_) => writeln!(out, "{n}: rejected")?,
                    Err(e) => writeln!(out, "{n}: {e}")?,
                }
            }
            ReviewCommand::Regenerate(n, feedback) => {
                let id = session.items()[n - 1].id;
                writeln!(out, "{n}: regenerating...")?;
                match session.regenerate(id, feedback, flow).await {
                    Ok(item) => {
                        let title = item.record.title();
                        writeln!(out, "{n}: {title}")?;
                    }
                    Err(e) => writeln!(out, "{n}: regeneration failed ({e}); kept the original")?,
                }
            }
            ReviewCommand::View(n) => {
                write_details(n, &session.items()[n - 1], out)?;
            }
            ReviewCommand::List => write_items(&session, out)?,
            ReviewCommand::Save => {
                let report = session.persist_approved(storage).await;
                writeln!(out, "saved {} item(s)", report.persisted.len())?;
                for failure in &report.failures {
                    writeln!(out, "  failed to save {}: {}", failure.item, failure.error)?;
                }
            }
            ReviewCommand::Quit { force } => {
                if !force {
                    if !session.is_resolved() {
                        writeln!(out, "some items are still pending; decide them or q! to leave")?;
                        continue;
                    }
                    if session.has_unsaved_approvals() {
                        writeln!(out, "approved items are not saved; s to save, q! to discard")?;
                        continue;
                    }
                }
                break;
            }
            ReviewCommand::Help => {
                writeln!(
                    out,
                    "a <n> approve | r <n> reject | g <n> <feedback> regenerate | v <n> view | l list | s save | q quit"
                )?;
            }
        }
    }

    let summary = session.summary();
    writeln!(
        out,
        "{} approved, {} rejected, {} pending, {} saved",
        summary.approved, summary.rejected, summary.pending, summary.persisted
    )?;
    Ok(session)
}

fn write_items(session: &ReviewSession, out: &mut impl Write) -> Result<()> {
    for (i, item) in session.items().iter().enumerate() {
        let saved = if item.persisted_id.is_some() { " (saved)" } else { "" };
        writeln!(
            out,
            "{:>3}. [{:<12}] {}{saved}",
            i + 1,
            item.status.to_string(),
            truncate(&item.record.title(), 60)
        )?;
    }
    Ok(())
}

fn write_details(n: usize, item: &ReviewItem, out: &mut impl Write) -> Result<()> {
    writeln!(out, "--- item {n} ({}) ---", item.status)?;
    match &item.record {
        GeneratedRecord::Plan(p) => {
            for (label, value) in [
                ("Title", &p.title),
                ("Description", &p.description),
                ("Objective", &p.objective),
                ("Scope", &p.scope),
                ("Approach", &p.approach),
                ("Acceptance criteria", &p.acceptance_criteria),
                ("Resources", &p.resources),
                ("Schedule", &p.schedule),
                ("Risks", &p.risks),
            ] {
                if !value.is_empty() {
                    writeln!(out, "{label}: {value}")?;
                }
            }
        }
        GeneratedRecord::Case(c) => {
            writeln!(out, "Title: {}", c.title)?;
            writeln!(out, "Priority: {}  Type: {}", c.priority, c.case_type)?;
            if !c.description.is_empty() {
                writeln!(out, "Description: {}", c.description)?;
            }
            if !c.preconditions.is_empty() {
                writeln!(out, "Preconditions: {}", c.preconditions)?;
            }
            for step in &c.steps {
                writeln!(out, "  {}. {} -> {}", step.order, step.action, step.expected_result)?;
            }
            if !c.expected_result.is_empty() {
                writeln!(out, "Expected: {}", c.expected_result)?;
            }
        }
        GeneratedRecord::Execution(e) => {
            writeln!(out, "Status: {}", e.status)?;
            writeln!(out, "Actual: {}", e.actual_result)?;
            writeln!(out, "Notes: {}", e.notes)?;
        }
    }
    for feedback in &item.feedback {
        writeln!(out, "Feedback given: {feedback}")?;
    }
    Ok(())
}
