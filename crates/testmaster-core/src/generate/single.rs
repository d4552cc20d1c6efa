//! Generate one record and store it immediately.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::prompts::format_steps;
use super::{FlowError, GenerationOptions, GenerationRequest};
use crate::ai::{GenerationError, GenerationExecutor, Variables};
use crate::records::{self, CaseDefaults, DomainRecord, GeneratedRecord};
use crate::storage::{self, Storage};

pub struct SingleItemFlow {
    executor: GenerationExecutor,
    storage: Arc<dyn Storage>,
}

/// Everything needed to turn the model's JSON into a record once the
/// request has been validated and its context loaded.
enum Shape {
    Plan,
    Case(CaseDefaults),
    Execution { plan_id: Uuid, case_id: Uuid },
}

impl SingleItemFlow {
    pub fn new(executor: GenerationExecutor, storage: Arc<dyn Storage>) -> Self {
        Self { executor, storage }
    }

    pub async fn generate_one(
        &self,
        request: GenerationRequest,
        owner_id: Uuid,
    ) -> Result<DomainRecord, FlowError> {
        self.generate_one_with(request, owner_id, &GenerationOptions::default())
            .await
    }

    /// Validate, generate, convert, persist. Validation and context loading
    /// happen before any provider call.
    pub async fn generate_one_with(
        &self,
        request: GenerationRequest,
        owner_id: Uuid,
        options: &GenerationOptions,
    ) -> Result<DomainRecord, FlowError> {
        let task = request.task();
        let (variables, shape) = self.prepare(request, owner_id).await?;

        let value = self
            .executor
            .execute(
                task,
                &variables,
                options.model_id.as_deref(),
                options.template_id.as_deref(),
            )
            .await?;

        if !value.is_object() {
            tracing::warn!(%task, "model returned JSON that is not an object");
            return Err(GenerationError::MalformedResponse {
                detail: "expected a JSON object".to_string(),
            }
            .into());
        }

        let record = match shape {
            Shape::Plan => GeneratedRecord::Plan(records::plan_from_json(&value)),
            Shape::Case(defaults) => GeneratedRecord::Case(records::case_from_json(&value, defaults)),
            Shape::Execution { plan_id, case_id } => {
                GeneratedRecord::Execution(records::execution_from_json(&value, plan_id, case_id))
            }
        }
        .owned_by(owner_id);

        match storage::create_record(self.storage.as_ref(), &record).await {
            Ok(stored) => Ok(stored),
            Err(source) => {
                tracing::warn!(kind = %record.kind(), error = %source, "failed to save generated record");
                Err(FlowError::Persistence {
                    record: Box::new(record),
                    source,
                })
            }
        }
    }

    /// Plans and cases the request refers to must belong to `owner_id`;
    /// anyone else's are reported as missing.
    async fn prepare(
        &self,
        request: GenerationRequest,
        owner_id: Uuid,
    ) -> Result<(Variables, Shape), FlowError> {
        match request {
            GenerationRequest::Plan {
                description,
                requirements,
                context,
            } => {
                if description.trim().is_empty() {
                    return Err(FlowError::Validation("a description is required".into()));
                }
                let vars = variables([
                    ("description", Value::String(description)),
                    ("requirements", Value::String(requirements)),
                    ("context", Value::String(context.unwrap_or_default())),
                ]);
                Ok((vars, Shape::Plan))
            }

            GenerationRequest::Case {
                plan_id,
                feature,
                requirements,
                case_type,
                priority,
            } => {
                if feature.trim().is_empty() {
                    return Err(FlowError::Validation("a feature description is required".into()));
                }
                let mut vars = variables([
                    ("feature", Value::String(feature)),
                    ("requirements", Value::String(requirements)),
                    ("case_type", Value::String(case_type.to_string())),
                    ("priority", Value::String(priority.to_string())),
                ]);
                if let Some(plan_id) = plan_id {
                    let plan = self
                        .storage
                        .get_plan(plan_id)
                        .await
                        .map_err(FlowError::Storage)?
                        .filter(|p| p.owner_id == owner_id)
                        .ok_or_else(|| FlowError::Validation(format!("test plan {plan_id} not found")))?;
                    vars.insert("plan_title".into(), Value::String(plan.title));
                    vars.insert("plan_description".into(), Value::String(plan.description));
                    vars.insert("plan_objective".into(), Value::String(plan.objective));
                    vars.insert("plan_scope".into(), Value::String(plan.scope));
                }
                let defaults = CaseDefaults {
                    plan_id,
                    priority,
                    case_type,
                };
                Ok((vars, Shape::Case(defaults)))
            }

            GenerationRequest::Execution {
                case_id,
                plan_id,
                environment,
                notes,
            } => {
                let (Some(case_id), Some(plan_id)) = (case_id, plan_id) else {
                    return Err(FlowError::Validation(
                        "both a test case and a test plan are required".into(),
                    ));
                };
                let plan = self
                    .storage
                    .get_plan(plan_id)
                    .await
                    .map_err(FlowError::Storage)?
                    .filter(|p| p.owner_id == owner_id)
                    .ok_or_else(|| FlowError::Validation(format!("test plan {plan_id} not found")))?;
                let case = self
                    .storage
                    .get_case(case_id)
                    .await
                    .map_err(FlowError::Storage)?
                    .filter(|c| c.owner_id == owner_id)
                    .ok_or_else(|| FlowError::Validation(format!("test case {case_id} not found")))?;
                if case.plan_id.is_some_and(|p| p != plan_id) {
                    return Err(FlowError::Validation(format!(
                        "test case {case_id} does not belong to plan {plan_id}"
                    )));
                }

                let steps = format_steps(&case);
                let vars = variables([
                    ("plan_title", Value::String(plan.title)),
                    ("case_title", Value::String(case.title)),
                    ("case_description", Value::String(case.description)),
                    ("case_steps", Value::String(steps)),
                    ("case_expected_result", Value::String(case.expected_result)),
                    ("environment", Value::String(environment)),
                    ("notes", Value::String(notes)),
                ]);
                Ok((vars, Shape::Execution { plan_id, case_id }))
            }
        }
    }
}

fn variables<const N: usize>(pairs: [(&str, Value); N]) -> Variables {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}
