//! Model descriptors: which provider to call, with which settings, for
//! which generation tasks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::task::GenerationTask;

/// Completion API family a model is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Google Generative Language API (`generateContent`).
    Gemini,
    /// Any endpoint speaking the OpenAI `chat/completions` protocol.
    Openai,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gemini => "gemini",
            Self::Openai => "openai",
        })
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::Openai),
            other => Err(ProviderKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProviderKind`] string.
#[derive(Debug, Clone)]
pub struct ProviderKindParseError(pub String);

impl fmt::Display for ProviderKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid provider: {:?}", self.0)
    }
}

impl std::error::Error for ProviderKindParseError {}

/// Provider-side tuning knobs. Unset values are omitted from the request so
/// the provider's own defaults apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    /// Overrides the provider's public endpoint (self-hosted gateways, tests).
    pub base_url: Option<String>,
}

/// A named model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub provider: ProviderKind,
    /// Model name as the provider knows it (e.g. `gemini-1.5-flash`).
    pub provider_model: String,
    pub capabilities: Vec<GenerationTask>,
    pub active: bool,
    /// Key into the credential store; the secret itself never lives here.
    pub credential_ref: String,
    #[serde(default)]
    pub settings: ModelSettings,
}

impl ModelDescriptor {
    pub fn supports(&self, task: GenerationTask) -> bool {
        self.capabilities.contains(&task)
    }
}

/// Fields for registering a model; the registry assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewModel {
    pub name: String,
    pub provider: ProviderKind,
    pub provider_model: String,
    #[serde(default)]
    pub capabilities: Vec<GenerationTask>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub credential_ref: String,
    #[serde(default)]
    pub settings: ModelSettings,
}

fn default_active() -> bool {
    true
}

/// Partial update for a model. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPatch {
    pub name: Option<String>,
    pub provider: Option<ProviderKind>,
    pub provider_model: Option<String>,
    pub capabilities: Option<Vec<GenerationTask>>,
    pub active: Option<bool>,
    pub credential_ref: Option<String>,
    pub settings: Option<ModelSettings>,
}

impl ModelPatch {
    pub(crate) fn apply(self, model: &mut ModelDescriptor) {
        if let Some(name) = self.name {
            model.name = name;
        }
        if let Some(provider) = self.provider {
            model.provider = provider;
        }
        if let Some(provider_model) = self.provider_model {
            model.provider_model = provider_model;
        }
        if let Some(capabilities) = self.capabilities {
            model.capabilities = capabilities;
        }
        if let Some(active) = self.active {
            model.active = active;
        }
        if let Some(credential_ref) = self.credential_ref {
            model.credential_ref = credential_ref;
        }
        if let Some(settings) = self.settings {
            model.settings = settings;
        }
    }
}
