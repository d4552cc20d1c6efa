use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a generation request produces. Selects the default model and the
/// candidate prompt templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationTask {
    PlanGeneration,
    CaseGeneration,
    ExecutionGeneration,
    GeneralCompletion,
}

impl GenerationTask {
    pub const ALL: [GenerationTask; 4] = [
        Self::PlanGeneration,
        Self::CaseGeneration,
        Self::ExecutionGeneration,
        Self::GeneralCompletion,
    ];
}

impl fmt::Display for GenerationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PlanGeneration => "plan-generation",
            Self::CaseGeneration => "case-generation",
            Self::ExecutionGeneration => "execution-generation",
            Self::GeneralCompletion => "general-completion",
        };
        f.write_str(s)
    }
}

impl FromStr for GenerationTask {
    type Err = GenerationTaskParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan-generation" => Ok(Self::PlanGeneration),
            "case-generation" => Ok(Self::CaseGeneration),
            "execution-generation" => Ok(Self::ExecutionGeneration),
            "general-completion" => Ok(Self::GeneralCompletion),
            other => Err(GenerationTaskParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`GenerationTask`] string.
#[derive(Debug, Clone)]
pub struct GenerationTaskParseError(pub String);

impl fmt::Display for GenerationTaskParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid generation task: {:?}", self.0)
    }
}

impl std::error::Error for GenerationTaskParseError {}
