//! `testmaster generate`: one record from the configured model, stored on
//! success.

use anyhow::{Context, Result, anyhow};

use testmaster_core::generate::{FlowError, GenerationOptions, GenerationRequest, SingleItemFlow};
use testmaster_core::permission::Permission;
use testmaster_core::records::DomainRecord;

use crate::GenerateCommands;
use crate::context::AppContext;
use crate::record_cmds::case_details;

pub async fn run_generate(
    command: GenerateCommands,
    model: Option<String>,
    template: Option<String>,
    ctx: &AppContext,
) -> Result<()> {
    let access = ctx.require(Permission::UseAi).await?;
    let request = build_request(command, ctx).await?;
    let options = GenerationOptions {
        model_id: model,
        template_id: template,
    };

    println!("Generating {}...", request.task());
    let flow = SingleItemFlow::new(ctx.executor(), ctx.storage.clone());
    let record = flow
        .generate_one_with(request, access.user_id, &options)
        .await
        .map_err(explain)?;

    match &record {
        DomainRecord::Plan(plan) => println!("Created test plan {} \"{}\".", plan.id, plan.title),
        DomainRecord::Case(case) => {
            println!("Created test case {}.", case.id);
            println!();
            print!("{}", case_details(case));
        }
        DomainRecord::Execution(e) => {
            println!("Recorded execution {}: {}", e.id, e.status);
            if !e.actual_result.is_empty() {
                println!("  {}", e.actual_result);
            }
        }
    }
    Ok(())
}

async fn build_request(command: GenerateCommands, ctx: &AppContext) -> Result<GenerationRequest> {
    Ok(match command {
        GenerateCommands::Plan {
            description,
            requirements,
            context,
        } => GenerationRequest::Plan {
            description,
            requirements,
            context,
        },
        GenerateCommands::Case {
            feature,
            plan,
            requirements,
            case_type,
            priority,
        } => GenerationRequest::Case {
            plan_id: plan,
            feature,
            requirements,
            case_type,
            priority,
        },
        GenerateCommands::Execution {
            case,
            plan,
            environment,
            notes,
        } => {
            let plan_id = match plan {
                Some(id) => Some(id),
                None => ctx
                    .storage
                    .get_case(case)
                    .await?
                    .with_context(|| format!("test case {case} not found"))?
                    .plan_id,
            };
            GenerationRequest::Execution {
                case_id: Some(case),
                plan_id,
                environment,
                notes,
            }
        }
    })
}

/// Turn a flow failure into something an operator can act on. Generated
/// content that could not be stored is printed so it is not lost.
fn explain(err: FlowError) -> anyhow::Error {
    match err {
        FlowError::Validation(msg) => anyhow!(msg),
        FlowError::Generation(e) => {
            tracing::debug!(error = %e, "generation failed");
            anyhow!("{} ({e})", e.user_message())
        }
        FlowError::Persistence { record, source } => {
            if let Ok(json) = serde_json::to_string_pretty(&record) {
                eprintln!("Generated content (not saved):\n{json}");
            }
            source.context(format!("failed to save generated {}", record.kind()))
        }
        FlowError::Storage(e) => e.context("failed to load generation context"),
    }
}

#[cfg(test)]
mod tests {
    use testmaster_core::ai::GenerationError;
    use testmaster_core::ai::GenerationTask;
    use testmaster_core::records::GeneratedRecord;
    use testmaster_db::models::NewTestPlan;

    use super::*;

    #[test]
    fn configuration_errors_read_as_such() {
        let err = explain(FlowError::Generation(GenerationError::NoActiveModel {
            task: GenerationTask::PlanGeneration,
        }));
        assert!(err.to_string().starts_with("generation unavailable, check configuration"));
    }

    #[test]
    fn persistence_errors_name_the_record_kind() {
        let err = explain(FlowError::Persistence {
            record: Box::new(GeneratedRecord::Plan(NewTestPlan::default())),
            source: anyhow!("connection reset"),
        });
        assert_eq!(err.to_string(), "failed to save generated plan");
        assert_eq!(format!("{err:#}"), "failed to save generated plan: connection reset");
    }
}
