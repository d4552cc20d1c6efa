//! Prompts built in code rather than from registry templates: batch
//! decomposition and item regeneration both go through the general
//! completion template.

use testmaster_db::models::{TestCase, TestPlan};

use super::BatchKind;
use crate::records::GeneratedRecord;

const PLAN_SHAPE: &str = r#"{"plans": [{"title": "...", "description": "...", "objective": "...", "scope": "...", "approach": "...", "acceptance_criteria": "...", "resources": "...", "schedule": "...", "risks": "..."}]}"#;

const CASE_SHAPE: &str = r#"{"cases": [{"title": "...", "description": "...", "preconditions": "...", "priority": "low|medium|high|critical", "type": "functional|integration|performance|security|usability", "steps": [{"step_number": 1, "action": "...", "expected_result": "..."}], "expected_result": "..."}]}"#;

pub(crate) fn decomposition_prompt(
    kind: BatchKind,
    document: &str,
    context: Option<&str>,
    plan: Option<&TestPlan>,
) -> String {
    let (noun, shape) = match kind {
        BatchKind::Plans => ("test plans", PLAN_SHAPE),
        BatchKind::Cases => ("test cases", CASE_SHAPE),
    };

    let mut prompt = format!(
        "You are a senior QA engineer. Read the requirements document below and \
         derive as many distinct {noun} as it warrants; choose the number yourself.\n\n\
         Document:\n{document}\n"
    );
    if let Some(plan) = plan {
        prompt.push_str(&format!(
            "\nThe {noun} belong to the test plan \"{}\".\nObjective: {}\nScope: {}\n",
            plan.title, plan.objective, plan.scope
        ));
    }
    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!("\nAdditional context:\n{context}\n"));
    }
    prompt.push_str(&format!(
        "\nRespond with a single JSON object inside a ```json fenced block, shaped as:\n{shape}\n"
    ));
    prompt
}

pub(crate) fn regeneration_prompt(record: &GeneratedRecord, feedback: &str) -> String {
    let (noun, current) = match record {
        GeneratedRecord::Plan(p) => ("test plan", serde_json::to_string_pretty(p)),
        GeneratedRecord::Case(c) => ("test case", serde_json::to_string_pretty(c)),
        GeneratedRecord::Execution(e) => ("test execution", serde_json::to_string_pretty(e)),
    };
    let current = current.unwrap_or_default();

    format!(
        "You are a senior QA engineer. Revise the {noun} below according to the reviewer's \
         feedback. Keep everything the feedback does not ask to change.\n\n\
         Current {noun}:\n{current}\n\n\
         Feedback:\n{feedback}\n\n\
         Respond with the revised {noun} as a single JSON object with the same fields, \
         inside a ```json fenced block.\n"
    )
}

/// Numbered step list for prompt context.
pub(crate) fn format_steps(case: &TestCase) -> String {
    case.steps
        .iter()
        .map(|s| {
            if s.expected_result.is_empty() {
                format!("{}. {}", s.order, s.action)
            } else {
                format!("{}. {} (expect: {})", s.order, s.action, s.expected_result)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
