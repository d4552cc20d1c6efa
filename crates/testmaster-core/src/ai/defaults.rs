//! Built-in models and prompt templates seeded into a fresh registry.

use super::model::{ModelSettings, NewModel, ProviderKind};
use super::task::GenerationTask;

pub const GEMINI_CREDENTIAL: &str = "gemini";
pub const OPENAI_CREDENTIAL: &str = "openai";

pub(crate) fn builtin_models() -> Vec<NewModel> {
    vec![
        NewModel {
            name: "Gemini Flash".to_string(),
            provider: ProviderKind::Gemini,
            provider_model: "gemini-1.5-flash".to_string(),
            capabilities: GenerationTask::ALL.to_vec(),
            active: true,
            credential_ref: GEMINI_CREDENTIAL.to_string(),
            settings: ModelSettings {
                temperature: Some(0.7),
                max_tokens: Some(8192),
                top_p: Some(0.95),
                top_k: Some(40),
                base_url: None,
            },
        },
        NewModel {
            name: "GPT-4o mini".to_string(),
            provider: ProviderKind::Openai,
            provider_model: "gpt-4o-mini".to_string(),
            capabilities: GenerationTask::ALL.to_vec(),
            active: true,
            credential_ref: OPENAI_CREDENTIAL.to_string(),
            settings: ModelSettings {
                temperature: Some(0.7),
                max_tokens: Some(4096),
                ..Default::default()
            },
        },
    ]
}

const PLAN_TEMPLATE: &str = r#"You are a senior QA engineer. Write a test plan for the following.

Description:
{{description}}
{{#if requirements}}
Requirements:
{{requirements}}
{{/if}}{{#if context}}
Additional context:
{{context}}
{{/if}}
Respond with a single JSON object inside a ```json fenced block with these
string fields: "title", "description", "objective", "scope", "approach",
"acceptance_criteria", "resources", "schedule", "risks"."#;

const CASE_TEMPLATE: &str = r#"You are a senior QA engineer. Write one {{case_type}} test case of {{priority}} priority.

Feature:
{{feature}}
{{#if requirements}}
Requirements:
{{requirements}}
{{/if}}{{#if plan_title}}
It belongs to the test plan "{{plan_title}}":
{{plan_description}}
Scope: {{plan_scope}}
{{/if}}
Respond with a single JSON object inside a ```json fenced block with the
fields "title", "description", "preconditions", "expected_result",
"priority" (low|medium|high|critical), "type"
(functional|integration|performance|security|usability) and "steps", an array
of objects with "step_number", "action" and "expected_result"."#;

const EXECUTION_TEMPLATE: &str = r#"You are a QA engineer recording a test execution.

Test plan: {{plan_title}}
Test case: {{case_title}}
{{case_description}}
Steps:
{{case_steps}}
Expected result: {{case_expected_result}}
{{#if environment}}
Environment: {{environment}}
{{/if}}{{#if notes}}
Tester notes: {{notes}}
{{/if}}
Respond with a single JSON object inside a ```json fenced block with the
fields "status" (passed|failed|blocked|not_tested), "actual_result" and
"notes"."#;

const GENERAL_TEMPLATE: &str = "{{prompt}}";

pub(crate) struct BuiltinTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub task: GenerationTask,
    pub content: &'static str,
}

pub(crate) const BUILTIN_TEMPLATES: [BuiltinTemplate; 4] = [
    BuiltinTemplate {
        id: "builtin-plan-generation",
        name: "Test plan",
        task: GenerationTask::PlanGeneration,
        content: PLAN_TEMPLATE,
    },
    BuiltinTemplate {
        id: "builtin-case-generation",
        name: "Test case",
        task: GenerationTask::CaseGeneration,
        content: CASE_TEMPLATE,
    },
    BuiltinTemplate {
        id: "builtin-execution-generation",
        name: "Test execution",
        task: GenerationTask::ExecutionGeneration,
        content: EXECUTION_TEMPLATE,
    },
    BuiltinTemplate {
        id: "builtin-general-completion",
        name: "Raw prompt",
        task: GenerationTask::GeneralCompletion,
        content: GENERAL_TEMPLATE,
    },
];
