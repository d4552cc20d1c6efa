//! LLM plumbing: model/template registry, prompt rendering, providers and
//! the generation executor.

pub mod defaults;
pub mod error;
pub mod executor;
pub mod model;
pub mod provider;
pub mod registry;
pub mod store;
pub mod task;
pub mod template;

pub use error::GenerationError;
pub use executor::GenerationExecutor;
pub use model::{ModelDescriptor, ModelPatch, ModelSettings, NewModel, ProviderKind};
pub use registry::{ModelRegistry, RegistryError, SharedRegistry};
pub use store::{Credentials, RegistryStore, SharedCredentials};
pub use task::GenerationTask;
pub use template::{NewTemplate, PromptTemplate, TemplatePatch, Variables};
