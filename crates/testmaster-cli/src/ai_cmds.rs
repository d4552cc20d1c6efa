//! `testmaster model` and `testmaster template`: manage the AI registry.
//!
//! Reads need `use_ai`; changes need an administrator. Every change is
//! written back to `ai-config.json` immediately.

use anyhow::{Context, Result, bail};

use testmaster_core::ai::template::engine::referenced_variables;
use testmaster_core::ai::{
    GenerationTask, ModelPatch, ModelRegistry, ModelSettings, NewModel, NewTemplate,
};
use testmaster_core::permission::Permission;

use crate::context::AppContext;
use crate::record_cmds::truncate;
use crate::{ModelCommands, TemplateCommands};

// -----------------------------------------------------------------------
// Models
// -----------------------------------------------------------------------

pub async fn run_model_command(command: ModelCommands, ctx: &AppContext) -> Result<()> {
    match command {
        ModelCommands::List => {
            ctx.require(Permission::UseAi).await?;
            let registry = ctx.registry.read().await;
            print!("{}", models_table(&registry));
            Ok(())
        }
        ModelCommands::Add {
            name,
            provider,
            provider_model,
            credential,
            tasks,
            temperature,
            max_tokens,
            base_url,
        } => {
            ctx.require_admin().await?;
            let capabilities = if tasks.is_empty() {
                GenerationTask::ALL.to_vec()
            } else {
                tasks
            };
            let model = ctx.registry.write().await.add_model(NewModel {
                name,
                provider,
                provider_model,
                capabilities,
                active: true,
                credential_ref: credential,
                settings: ModelSettings {
                    temperature,
                    max_tokens,
                    base_url,
                    ..Default::default()
                },
            });
            ctx.save_registry().await?;
            println!("Added model {} ({}).", model.id, model.name);
            let has_key = ctx.credentials.read().await.resolve(&model.credential_ref).is_some();
            if !has_key {
                println!(
                    "No API key for {:?} yet; run `testmaster model set-key {} <key>`.",
                    model.credential_ref, model.credential_ref
                );
            }
            Ok(())
        }
        ModelCommands::Activate { id } => set_active(ctx, &id, true).await,
        ModelCommands::Deactivate { id } => set_active(ctx, &id, false).await,
        ModelCommands::Delete { id } => {
            ctx.require_admin().await?;
            if !ctx.registry.write().await.delete_model(&id) {
                bail!("model {id} not found");
            }
            ctx.save_registry().await?;
            println!("Deleted model {id}.");
            Ok(())
        }
        ModelCommands::SetDefault { id, task } => {
            ctx.require_admin().await?;
            {
                let mut registry = ctx.registry.write().await;
                let model = registry
                    .get_model(&id)
                    .with_context(|| format!("model {id} not found"))?;
                if let Some(task) = task {
                    if !model.supports(task) {
                        bail!("model {id} does not support {task}");
                    }
                    registry.set_default_model(task, id.clone());
                } else {
                    registry.set_global_default(id.clone());
                }
            }
            ctx.save_registry().await?;
            match task {
                Some(task) => println!("Model {id} is now the default for {task}."),
                None => println!("Model {id} is now the global default."),
            }
            Ok(())
        }
        ModelCommands::SetKey { credential, key } => {
            ctx.require_admin().await?;
            ctx.credentials.write().await.set(credential.clone(), key);
            ctx.save_credentials().await?;
            println!("Stored API key for {credential:?}.");
            Ok(())
        }
        ModelCommands::Push => {
            ctx.require_admin().await?;
            let registry = ctx.registry.read().await.clone();
            ctx.store.sync_to_remote(&registry, ctx.storage.as_ref()).await?;
            println!("Pushed AI configuration ({} models).", registry.models().len());
            Ok(())
        }
        ModelCommands::Pull => {
            ctx.require_admin().await?;
            match ctx.store.pull_remote(ctx.storage.as_ref()).await? {
                Some(remote) => {
                    let count = remote.models().len();
                    *ctx.registry.write().await = remote;
                    println!("Pulled AI configuration ({count} models).");
                }
                None => println!("No shared AI configuration stored yet."),
            }
            Ok(())
        }
    }
}

async fn set_active(ctx: &AppContext, id: &str, active: bool) -> Result<()> {
    ctx.require_admin().await?;
    let patch = ModelPatch {
        active: Some(active),
        ..Default::default()
    };
    if ctx.registry.write().await.update_model(id, patch).is_none() {
        bail!("model {id} not found");
    }
    ctx.save_registry().await?;
    println!(
        "Model {id} {}.",
        if active { "activated" } else { "deactivated" }
    );
    Ok(())
}

pub fn models_table(registry: &ModelRegistry) -> String {
    let mut out = format!(
        "{:<36}  {:<20}  {:<8}  {:<24}  {:<8}  CREDENTIAL\n",
        "ID", "NAME", "PROVIDER", "MODEL", "ACTIVE"
    );
    for m in registry.models() {
        out.push_str(&format!(
            "{:<36}  {:<20}  {:<8}  {:<24}  {:<8}  {}\n",
            m.id,
            truncate(&m.name, 20),
            m.provider.to_string(),
            truncate(&m.provider_model, 24),
            if m.active { "yes" } else { "no" },
            m.credential_ref,
        ));
    }

    out.push_str("\nDefaults:\n");
    for task in GenerationTask::ALL {
        let line = match registry.default_model(task) {
            Ok(model) => format!("{} ({})", model.id, model.name),
            Err(e) => format!("none: {e}"),
        };
        out.push_str(&format!("  {:<22} {line}\n", task.to_string()));
    }
    out.push_str(&format!(
        "  {:<22} {}\n",
        "global",
        registry.global_default().unwrap_or("-")
    ));
    out
}

// -----------------------------------------------------------------------
// Templates
// -----------------------------------------------------------------------

pub async fn run_template_command(command: TemplateCommands, ctx: &AppContext) -> Result<()> {
    match command {
        TemplateCommands::List { task } => {
            ctx.require(Permission::UseAi).await?;
            let registry = ctx.registry.read().await;
            println!("{:<36}  {:<30}  {:<22}  ACTIVE", "ID", "NAME", "TASK");
            for t in registry
                .templates()
                .iter()
                .filter(|t| task.is_none_or(|task| t.task == task))
            {
                println!(
                    "{:<36}  {:<30}  {:<22}  {}",
                    t.id,
                    truncate(&t.name, 30),
                    t.task.to_string(),
                    if t.active { "yes" } else { "no" }
                );
            }
            Ok(())
        }
        TemplateCommands::Show { id } => {
            ctx.require(Permission::UseAi).await?;
            let registry = ctx.registry.read().await;
            let template = registry
                .get_template(&id)
                .with_context(|| format!("template {id} not found"))?;
            println!("Template:  {} ({})", template.name, template.id);
            println!("Task:      {}", template.task);
            println!("Variables: {}", template.parameters.join(", "));
            println!();
            println!("{}", template.content);
            Ok(())
        }
        TemplateCommands::Add { name, task, file } => {
            ctx.require_admin().await?;
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read template {}", file.display()))?;
            if referenced_variables(&content).is_empty() {
                println!("Note: the template references no variables.");
            }
            let template = ctx.registry.write().await.add_template(NewTemplate {
                name,
                task,
                content,
                parameters: Vec::new(),
                active: true,
            });
            ctx.save_registry().await?;
            println!(
                "Added template {} for {} (variables: {}).",
                template.id,
                template.task,
                template.parameters.join(", ")
            );
            Ok(())
        }
        TemplateCommands::Delete { id } => {
            ctx.require_admin().await?;
            if !ctx.registry.write().await.delete_template(&id) {
                bail!("template {id} not found");
            }
            ctx.save_registry().await?;
            println!("Deleted template {id}.");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_table_shows_defaults_and_gaps() {
        let mut registry = ModelRegistry::with_builtin_defaults();
        let table = models_table(&registry);
        assert!(table.contains("gemini-default"));
        assert!(table.contains("openai-default"));
        assert!(table.contains("global                 gemini-default"));

        registry.update_model(
            "gemini-default",
            ModelPatch {
                active: Some(false),
                ..Default::default()
            },
        );
        let table = models_table(&registry);
        assert!(table.contains("none:"), "inactive defaults should be flagged:\n{table}");
    }
}
