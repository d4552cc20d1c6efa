//! Completion providers: the outbound HTTP calls to hosted LLM APIs.

pub mod gemini;
pub mod openai;

use async_trait::async_trait;

use super::model::{ModelSettings, ProviderKind};

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

/// One prompt sent to one model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub provider: ProviderKind,
    pub prompt: String,
    /// Provider-side model name.
    pub model: String,
    pub settings: ModelSettings,
    pub api_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request to provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider response had no completion text: {0}")]
    InvalidBody(String),
}

/// A backend that turns a prompt into completion text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

// Compile-time assertion: `CompletionProvider` must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn CompletionProvider) {}
};

/// Dispatches each request to the client for its [`ProviderKind`].
pub struct ProviderRouter {
    gemini: GeminiClient,
    openai: OpenAiClient,
}

impl ProviderRouter {
    pub fn new() -> Self {
        let http = reqwest::Client::new();
        Self {
            gemini: GeminiClient::with_client(http.clone()),
            openai: OpenAiClient::with_client(http),
        }
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for ProviderRouter {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        match request.provider {
            ProviderKind::Gemini => self.gemini.complete(request).await,
            ProviderKind::Openai => self.openai.complete(request).await,
        }
    }
}

/// Read a non-2xx response into a [`ProviderError::Status`].
pub(crate) async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ProviderError::Status { status, body }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(join_url("http://x/v1/", "/chat"), "http://x/v1/chat");
        assert_eq!(join_url("http://x/v1", "chat"), "http://x/v1/chat");
    }
}
