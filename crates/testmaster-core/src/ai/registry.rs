//! In-process registry of models, prompt templates, and per-task defaults.
//!
//! The registry is a plain value. Callers that share it wrap it in
//! [`SharedRegistry`] and clone what they need out of the lock before
//! awaiting anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::defaults;
use super::model::{ModelDescriptor, ModelPatch, NewModel};
use super::task::GenerationTask;
use super::template::{self, NewTemplate, PromptTemplate, TemplatePatch, Variables};

/// Registry shared between the executor, flows, CLI and server.
pub type SharedRegistry = Arc<RwLock<ModelRegistry>>;

/// Why a task's default model cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no default model configured for {task}")]
    NoDefault { task: GenerationTask },

    #[error("default model {model_id} for {task} is inactive")]
    Inactive {
        task: GenerationTask,
        model_id: String,
    },

    #[error("default model {model_id} for {task} does not exist")]
    UnknownModel {
        task: GenerationTask,
        model_id: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
    templates: Vec<PromptTemplate>,
    task_defaults: BTreeMap<GenerationTask, String>,
    global_default: Option<String>,
}

impl ModelRegistry {
    /// An empty registry: no models, no templates, no defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry seeded with the built-in models and one template per task.
    /// Every task defaults to the first built-in model.
    pub fn with_builtin_defaults() -> Self {
        let mut registry = Self::new();
        let now = Utc::now();

        for (i, new) in defaults::builtin_models().into_iter().enumerate() {
            let id = match i {
                0 => "gemini-default".to_string(),
                _ => format!("{}-default", new.provider),
            };
            registry.models.push(descriptor(id, new));
        }

        for builtin in &defaults::BUILTIN_TEMPLATES {
            registry.templates.push(PromptTemplate {
                id: builtin.id.to_string(),
                name: builtin.name.to_string(),
                task: builtin.task,
                content: builtin.content.to_string(),
                parameters: template::engine::referenced_variables(builtin.content),
                active: true,
                created_at: now,
                updated_at: now,
            });
        }

        if let Some(first) = registry.models.first().map(|m| m.id.clone()) {
            for task in GenerationTask::ALL {
                registry.task_defaults.insert(task, first.clone());
            }
            registry.global_default = Some(first);
        }
        registry
    }

    /// Wrap in the shared handle.
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    // -----------------------------------------------------------------------
    // Models
    // -----------------------------------------------------------------------

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn get_model(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    /// The model mapped to `task`, if it exists and is active.
    pub fn default_model(&self, task: GenerationTask) -> Result<&ModelDescriptor, RegistryError> {
        let model_id = self
            .task_defaults
            .get(&task)
            .ok_or(RegistryError::NoDefault { task })?;
        let model = self
            .get_model(model_id)
            .ok_or_else(|| RegistryError::UnknownModel {
                task,
                model_id: model_id.clone(),
            })?;
        if !model.active {
            return Err(RegistryError::Inactive {
                task,
                model_id: model_id.clone(),
            });
        }
        Ok(model)
    }

    /// Map `task` to `model_id`. The id is not validated; a dangling mapping
    /// surfaces later as [`RegistryError::UnknownModel`].
    pub fn set_default_model(&mut self, task: GenerationTask, model_id: impl Into<String>) {
        self.task_defaults.insert(task, model_id.into());
    }

    pub fn task_defaults(&self) -> &BTreeMap<GenerationTask, String> {
        &self.task_defaults
    }

    pub fn global_default(&self) -> Option<&str> {
        self.global_default.as_deref()
    }

    pub fn set_global_default(&mut self, model_id: impl Into<String>) {
        self.global_default = Some(model_id.into());
    }

    /// Pick the model for a request: the explicit id when it names an active
    /// model, otherwise the task default.
    pub fn resolve_model(
        &self,
        task: GenerationTask,
        explicit: Option<&str>,
    ) -> Option<&ModelDescriptor> {
        if let Some(id) = explicit {
            match self.get_model(id) {
                Some(model) if model.active => return Some(model),
                Some(_) => tracing::debug!(model_id = id, "requested model inactive, using default"),
                None => tracing::debug!(model_id = id, "requested model unknown, using default"),
            }
        }
        self.default_model(task).ok()
    }

    pub fn add_model(&mut self, new: NewModel) -> ModelDescriptor {
        let model = descriptor(Uuid::new_v4().to_string(), new);
        self.models.push(model.clone());
        model
    }

    pub fn update_model(&mut self, id: &str, patch: ModelPatch) -> Option<ModelDescriptor> {
        let model = self.models.iter_mut().find(|m| m.id == id)?;
        patch.apply(model);
        Some(model.clone())
    }

    /// Remove a model. Any task default or global default that pointed at it
    /// moves to the first remaining active model, or is cleared when no
    /// active model remains.
    pub fn delete_model(&mut self, id: &str) -> bool {
        let Some(pos) = self.models.iter().position(|m| m.id == id) else {
            return false;
        };
        self.models.remove(pos);

        let replacement = self
            .models
            .iter()
            .find(|m| m.active)
            .map(|m| m.id.clone());
        let orphaned: Vec<GenerationTask> = self
            .task_defaults
            .iter()
            .filter(|(_, model_id)| model_id.as_str() == id)
            .map(|(task, _)| *task)
            .collect();
        for task in orphaned {
            match &replacement {
                Some(next) => {
                    self.task_defaults.insert(task, next.clone());
                }
                None => {
                    self.task_defaults.remove(&task);
                }
            }
        }
        if self.global_default.as_deref() == Some(id) {
            self.global_default = replacement;
        }
        true
    }

    // -----------------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------------

    pub fn templates(&self) -> &[PromptTemplate] {
        &self.templates
    }

    pub fn get_template(&self, id: &str) -> Option<&PromptTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Active templates for `task`, in insertion order.
    pub fn templates_for_task(&self, task: GenerationTask) -> Vec<&PromptTemplate> {
        self.templates
            .iter()
            .filter(|t| t.active && t.task == task)
            .collect()
    }

    /// Pick the template for a request: the explicit id when it names an
    /// active template of `task`, otherwise the first active one for `task`.
    pub fn resolve_template(
        &self,
        task: GenerationTask,
        explicit: Option<&str>,
    ) -> Option<&PromptTemplate> {
        let requested = explicit
            .and_then(|id| self.get_template(id))
            .filter(|t| t.active && t.task == task);
        if requested.is_some() {
            return requested;
        }
        self.templates.iter().find(|t| t.active && t.task == task)
    }

    pub fn add_template(&mut self, new: NewTemplate) -> PromptTemplate {
        let now = Utc::now();
        let parameters = if new.parameters.is_empty() {
            template::engine::referenced_variables(&new.content)
        } else {
            new.parameters
        };
        let tpl = PromptTemplate {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            task: new.task,
            content: new.content,
            parameters,
            active: new.active,
            created_at: now,
            updated_at: now,
        };
        self.templates.push(tpl.clone());
        tpl
    }

    /// Apply `patch` and stamp `updated_at`.
    pub fn update_template(&mut self, id: &str, patch: TemplatePatch) -> Option<PromptTemplate> {
        let tpl = self.templates.iter_mut().find(|t| t.id == id)?;
        patch.apply(tpl, Utc::now());
        Some(tpl.clone())
    }

    pub fn delete_template(&mut self, id: &str) -> bool {
        let before = self.templates.len();
        self.templates.retain(|t| t.id != id);
        self.templates.len() != before
    }

    pub fn render_template(&self, template: &PromptTemplate, variables: &Variables) -> String {
        template.render(variables)
    }
}

fn descriptor(id: String, new: NewModel) -> ModelDescriptor {
    ModelDescriptor {
        id,
        name: new.name,
        provider: new.provider,
        provider_model: new.provider_model,
        capabilities: new.capabilities,
        active: new.active,
        credential_ref: new.credential_ref,
        settings: new.settings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::model::{ModelSettings, ProviderKind};

    fn new_model(name: &str) -> NewModel {
        NewModel {
            name: name.to_string(),
            provider: ProviderKind::Openai,
            provider_model: format!("{name}-model"),
            capabilities: GenerationTask::ALL.to_vec(),
            active: true,
            credential_ref: "openai".to_string(),
            settings: ModelSettings::default(),
        }
    }

    #[test]
    fn builtin_defaults_cover_every_task() {
        let registry = ModelRegistry::with_builtin_defaults();
        assert_eq!(registry.models().len(), 2);
        for task in GenerationTask::ALL {
            let model = registry.default_model(task).expect("default should resolve");
            assert!(model.active);
            assert_eq!(registry.templates_for_task(task).len(), 1);
        }
        assert_eq!(registry.global_default(), Some("gemini-default"));
        assert!(registry.get_model("openai-default").is_some());
    }

    #[test]
    fn builtin_plan_template_declares_its_parameters() {
        let registry = ModelRegistry::with_builtin_defaults();
        let tpl = registry.templates_for_task(GenerationTask::PlanGeneration)[0];
        assert!(tpl.parameters.contains(&"description".to_string()));
        assert!(tpl.parameters.contains(&"context".to_string()));
    }

    #[test]
    fn default_model_errors() {
        let mut registry = ModelRegistry::new();
        assert_eq!(
            registry.default_model(GenerationTask::PlanGeneration),
            Err(RegistryError::NoDefault {
                task: GenerationTask::PlanGeneration
            })
        );

        registry.set_default_model(GenerationTask::PlanGeneration, "ghost");
        assert!(matches!(
            registry.default_model(GenerationTask::PlanGeneration),
            Err(RegistryError::UnknownModel { .. })
        ));

        let model = registry.add_model(NewModel {
            active: false,
            ..new_model("a")
        });
        registry.set_default_model(GenerationTask::PlanGeneration, model.id.clone());
        assert_eq!(
            registry.default_model(GenerationTask::PlanGeneration),
            Err(RegistryError::Inactive {
                task: GenerationTask::PlanGeneration,
                model_id: model.id
            })
        );
    }

    #[test]
    fn add_model_assigns_unique_ids() {
        let mut registry = ModelRegistry::new();
        let a = registry.add_model(new_model("a"));
        let b = registry.add_model(new_model("a"));
        assert_ne!(a.id, b.id);
        assert_eq!(registry.get_model(&b.id), Some(&b));
    }

    #[test]
    fn deleting_default_reassigns_to_remaining_model() {
        let mut registry = ModelRegistry::new();
        let a = registry.add_model(new_model("a"));
        let b = registry.add_model(new_model("b"));
        registry.set_default_model(GenerationTask::CaseGeneration, a.id.clone());
        registry.set_default_model(GenerationTask::PlanGeneration, b.id.clone());
        registry.set_global_default(a.id.clone());

        assert!(registry.delete_model(&a.id));

        assert_eq!(
            registry.task_defaults().get(&GenerationTask::CaseGeneration),
            Some(&b.id)
        );
        assert_eq!(
            registry.task_defaults().get(&GenerationTask::PlanGeneration),
            Some(&b.id)
        );
        assert_eq!(registry.global_default(), Some(b.id.as_str()));
        assert_eq!(
            registry
                .default_model(GenerationTask::CaseGeneration)
                .unwrap()
                .id,
            b.id
        );
    }

    #[test]
    fn deleting_default_skips_inactive_models() {
        let mut registry = ModelRegistry::new();
        let dormant = registry.add_model(NewModel {
            active: false,
            ..new_model("dormant")
        });
        let current = registry.add_model(new_model("current"));
        let other = registry.add_model(new_model("other"));
        registry.set_default_model(GenerationTask::PlanGeneration, current.id.clone());
        registry.set_global_default(current.id.clone());

        assert!(registry.delete_model(&current.id));

        assert_eq!(
            registry
                .default_model(GenerationTask::PlanGeneration)
                .unwrap()
                .id,
            other.id
        );
        assert_eq!(registry.global_default(), Some(other.id.as_str()));
        assert!(registry.get_model(&dormant.id).is_some());
    }

    #[test]
    fn deleting_default_with_only_inactive_left_clears_it() {
        let mut registry = ModelRegistry::new();
        registry.add_model(NewModel {
            active: false,
            ..new_model("dormant")
        });
        let current = registry.add_model(new_model("current"));
        registry.set_default_model(GenerationTask::CaseGeneration, current.id.clone());

        assert!(registry.delete_model(&current.id));
        assert!(registry.task_defaults().is_empty());
        assert_eq!(
            registry.default_model(GenerationTask::CaseGeneration),
            Err(RegistryError::NoDefault {
                task: GenerationTask::CaseGeneration
            })
        );
    }

    #[test]
    fn deleting_last_model_clears_defaults() {
        let mut registry = ModelRegistry::new();
        let a = registry.add_model(new_model("a"));
        registry.set_default_model(GenerationTask::PlanGeneration, a.id.clone());
        registry.set_global_default(a.id.clone());

        assert!(registry.delete_model(&a.id));
        assert!(registry.task_defaults().is_empty());
        assert_eq!(registry.global_default(), None);
        assert!(!registry.delete_model(&a.id));
    }

    #[test]
    fn resolve_model_falls_through_inactive_explicit() {
        let mut registry = ModelRegistry::with_builtin_defaults();
        registry.update_model(
            "openai-default",
            ModelPatch {
                active: Some(false),
                ..Default::default()
            },
        );
        let model = registry
            .resolve_model(GenerationTask::PlanGeneration, Some("openai-default"))
            .unwrap();
        assert_eq!(model.id, "gemini-default");

        let model = registry
            .resolve_model(GenerationTask::PlanGeneration, Some("missing"))
            .unwrap();
        assert_eq!(model.id, "gemini-default");
    }

    #[test]
    fn templates_for_task_filters_inactive_and_keeps_order() {
        let mut registry = ModelRegistry::new();
        let first = registry.add_template(NewTemplate {
            name: "first".into(),
            task: GenerationTask::CaseGeneration,
            content: "{{feature}}".into(),
            parameters: vec![],
            active: true,
        });
        let hidden = registry.add_template(NewTemplate {
            name: "hidden".into(),
            task: GenerationTask::CaseGeneration,
            content: "x".into(),
            parameters: vec![],
            active: false,
        });
        let second = registry.add_template(NewTemplate {
            name: "second".into(),
            task: GenerationTask::CaseGeneration,
            content: "y".into(),
            parameters: vec![],
            active: true,
        });

        let ids: Vec<&str> = registry
            .templates_for_task(GenerationTask::CaseGeneration)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
        assert_eq!(first.parameters, vec!["feature"]);

        // Explicit inactive or wrong-task ids fall back to the first active.
        let picked = registry
            .resolve_template(GenerationTask::CaseGeneration, Some(&hidden.id))
            .unwrap();
        assert_eq!(picked.id, first.id);
        let picked = registry
            .resolve_template(GenerationTask::CaseGeneration, Some(&second.id))
            .unwrap();
        assert_eq!(picked.id, second.id);
        assert!(
            registry
                .resolve_template(GenerationTask::PlanGeneration, Some(&first.id))
                .is_none()
        );
    }

    #[test]
    fn update_template_stamps_updated_at() {
        let mut registry = ModelRegistry::new();
        let tpl = registry.add_template(NewTemplate {
            name: "t".into(),
            task: GenerationTask::PlanGeneration,
            content: "a".into(),
            parameters: vec![],
            active: true,
        });
        let updated = registry
            .update_template(
                &tpl.id,
                TemplatePatch {
                    content: Some("b {{x}}".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.content, "b {{x}}");
        assert!(updated.updated_at >= tpl.updated_at);
        assert_eq!(updated.created_at, tpl.created_at);

        assert!(registry.delete_template(&tpl.id));
        assert!(registry.get_template(&tpl.id).is_none());
        assert!(!registry.delete_template(&tpl.id));
    }

    #[test]
    fn registry_serde_roundtrip() {
        let registry = ModelRegistry::with_builtin_defaults();
        let json = serde_json::to_string(&registry).unwrap();
        let back: ModelRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, registry);
    }
}
