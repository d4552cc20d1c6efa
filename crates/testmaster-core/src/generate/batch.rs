//! Decompose a requirements document into many records awaiting review.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::prompts::{decomposition_prompt, regeneration_prompt};
use super::{BatchKind, BatchRequest, FlowError};
use crate::ai::{GenerationError, GenerationExecutor, GenerationTask, Variables};
use crate::records::{self, CaseDefaults, GeneratedRecord};
use crate::review::ReviewSession;
use crate::storage::Storage;

pub struct BatchFlow {
    executor: GenerationExecutor,
    storage: Arc<dyn Storage>,
}

impl BatchFlow {
    pub fn new(executor: GenerationExecutor, storage: Arc<dyn Storage>) -> Self {
        Self { executor, storage }
    }

    /// Generate every record the document warrants. Nothing is stored; the
    /// records come back as pending items of a new review session.
    pub async fn generate_batch(
        &self,
        request: BatchRequest,
        owner_id: Uuid,
    ) -> Result<ReviewSession, FlowError> {
        if request.document.trim().is_empty() {
            return Err(FlowError::Validation("the document is empty".into()));
        }

        let plan = match (request.kind, request.plan_id) {
            (BatchKind::Cases, Some(plan_id)) => Some(
                self.storage
                    .get_plan(plan_id)
                    .await
                    .map_err(FlowError::Storage)?
                    .filter(|p| p.owner_id == owner_id)
                    .ok_or_else(|| FlowError::Validation(format!("test plan {plan_id} not found")))?,
            ),
            _ => None,
        };

        let prompt = decomposition_prompt(
            request.kind,
            &request.document,
            request.context.as_deref(),
            plan.as_ref(),
        );
        let value = self.complete(request.kind.task(), prompt).await?;

        let key = request.kind.key();
        let Some(elements) = value.get(key).and_then(Value::as_array) else {
            tracing::warn!(expected = key, "batch response missing item array");
            return Err(GenerationError::InvalidBatchShape { expected: key }.into());
        };

        let defaults = CaseDefaults {
            plan_id: plan.as_ref().map(|p| p.id),
            ..Default::default()
        };
        let mut items = Vec::with_capacity(elements.len());
        for (index, element) in elements.iter().enumerate() {
            if !element.is_object() {
                tracing::warn!(index, "skipping non-object batch element");
                continue;
            }
            let record = match request.kind {
                BatchKind::Plans => GeneratedRecord::Plan(records::plan_from_json(element)),
                BatchKind::Cases => GeneratedRecord::Case(records::case_from_json(element, defaults)),
            };
            items.push(record.owned_by(owner_id));
        }

        tracing::info!(kind = %request.kind, items = items.len(), "batch generated");
        Ok(ReviewSession::new(request.kind, owner_id, items))
    }

    /// Produce a revised copy of `record` that addresses `feedback`. Links
    /// (owner, plan, case) are carried over from the original.
    pub async fn regenerate(
        &self,
        record: &GeneratedRecord,
        feedback: &str,
    ) -> Result<GeneratedRecord, GenerationError> {
        let task = match record {
            GeneratedRecord::Plan(_) => GenerationTask::PlanGeneration,
            GeneratedRecord::Case(_) => GenerationTask::CaseGeneration,
            GeneratedRecord::Execution(_) => GenerationTask::ExecutionGeneration,
        };
        let value = self
            .complete(task, regeneration_prompt(record, feedback))
            .await?;
        if !value.is_object() {
            return Err(GenerationError::MalformedResponse {
                detail: "expected a JSON object".to_string(),
            });
        }

        let revised = match record {
            GeneratedRecord::Plan(p) => {
                GeneratedRecord::Plan(records::plan_from_json(&value)).owned_by(p.owner_id)
            }
            GeneratedRecord::Case(c) => {
                let defaults = CaseDefaults {
                    plan_id: c.plan_id,
                    priority: c.priority,
                    case_type: c.case_type,
                };
                GeneratedRecord::Case(records::case_from_json(&value, defaults)).owned_by(c.owner_id)
            }
            GeneratedRecord::Execution(e) => GeneratedRecord::Execution(
                records::execution_from_json(&value, e.plan_id, e.case_id),
            )
            .owned_by(e.owner_id),
        };
        Ok(revised)
    }

    /// Run a code-built prompt through the general completion template,
    /// on `preferred`'s default model when that one is usable.
    async fn complete(
        &self,
        preferred: GenerationTask,
        prompt: String,
    ) -> Result<Value, GenerationError> {
        let model_id = {
            let registry = self.executor.registry().read().await;
            registry.default_model(preferred).ok().map(|m| m.id.clone())
        };
        let mut variables = Variables::new();
        variables.insert("prompt".to_string(), Value::String(prompt));
        self.executor
            .execute(
                GenerationTask::GeneralCompletion,
                &variables,
                model_id.as_deref(),
                None,
            )
            .await
    }
}
