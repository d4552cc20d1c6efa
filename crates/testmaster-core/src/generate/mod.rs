//! Generation flows: one record straight to storage, or a batch of records
//! into a review session.

pub mod batch;
mod prompts;
pub mod single;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use testmaster_db::models::{CaseType, Priority};

use crate::ai::{GenerationError, GenerationTask};
use crate::records::{GeneratedRecord, RecordKind};

pub use batch::BatchFlow;
pub use single::SingleItemFlow;

/// Input for a single generated record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationRequest {
    Plan {
        description: String,
        #[serde(default)]
        requirements: String,
        #[serde(default)]
        context: Option<String>,
    },
    Case {
        #[serde(default)]
        plan_id: Option<Uuid>,
        feature: String,
        #[serde(default)]
        requirements: String,
        #[serde(default)]
        case_type: CaseType,
        #[serde(default)]
        priority: Priority,
    },
    Execution {
        case_id: Option<Uuid>,
        plan_id: Option<Uuid>,
        #[serde(default)]
        environment: String,
        #[serde(default)]
        notes: String,
    },
}

impl GenerationRequest {
    pub fn task(&self) -> GenerationTask {
        match self {
            Self::Plan { .. } => GenerationTask::PlanGeneration,
            Self::Case { .. } => GenerationTask::CaseGeneration,
            Self::Execution { .. } => GenerationTask::ExecutionGeneration,
        }
    }
}

/// Explicit model/template choice for one request. Unset or unusable ids
/// fall back to the registry defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub model_id: Option<String>,
    pub template_id: Option<String>,
}

/// What a batch decomposes a document into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Plans,
    Cases,
}

impl BatchKind {
    /// Key of the array the model must return.
    pub fn key(self) -> &'static str {
        match self {
            Self::Plans => "plans",
            Self::Cases => "cases",
        }
    }

    /// Task whose default model the batch prefers.
    pub fn task(self) -> GenerationTask {
        match self {
            Self::Plans => GenerationTask::PlanGeneration,
            Self::Cases => GenerationTask::CaseGeneration,
        }
    }

    pub fn record_kind(self) -> RecordKind {
        match self {
            Self::Plans => RecordKind::Plan,
            Self::Cases => RecordKind::Case,
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for BatchKind {
    type Err = BatchKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plans" | "plan" => Ok(Self::Plans),
            "cases" | "case" => Ok(Self::Cases),
            other => Err(BatchKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`BatchKind`] string.
#[derive(Debug, Clone)]
pub struct BatchKindParseError(pub String);

impl fmt::Display for BatchKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid batch kind: {:?} (expected plans or cases)", self.0)
    }
}

impl std::error::Error for BatchKindParseError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub kind: BatchKind,
    pub document: String,
    #[serde(default)]
    pub context: Option<String>,
    /// Plan the generated cases attach to. Ignored for plan batches.
    #[serde(default)]
    pub plan_id: Option<Uuid>,
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Generation succeeded but saving failed. `record` holds the content so
    /// the caller can retry the save without regenerating.
    #[error("generated {} could not be saved: {source:#}", .record.kind())]
    Persistence {
        record: Box<GeneratedRecord>,
        source: anyhow::Error,
    },

    #[error("failed to load generation context: {0:#}")]
    Storage(anyhow::Error),
}
