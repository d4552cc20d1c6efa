//! Prompt templates.

pub mod engine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::GenerationTask;

pub use engine::{Variables, render};

/// A stored prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    pub task: GenerationTask,
    pub content: String,
    /// Variable names the template expects. Informational only; rendering
    /// does not require them.
    #[serde(default)]
    pub parameters: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PromptTemplate {
    pub fn render(&self, vars: &Variables) -> String {
        engine::render(&self.content, vars)
    }
}

/// Fields for registering a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub task: GenerationTask,
    pub content: String,
    /// When empty, derived from the variables `content` references.
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial update for a template. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub task: Option<GenerationTask>,
    pub content: Option<String>,
    pub parameters: Option<Vec<String>>,
    pub active: Option<bool>,
}

impl TemplatePatch {
    pub(crate) fn apply(self, template: &mut PromptTemplate, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            template.name = name;
        }
        if let Some(task) = self.task {
            template.task = task;
        }
        if let Some(content) = self.content {
            template.content = content;
        }
        if let Some(parameters) = self.parameters {
            template.parameters = parameters;
        }
        if let Some(active) = self.active {
            template.active = active;
        }
        template.updated_at = now;
    }
}
