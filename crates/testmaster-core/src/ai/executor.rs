//! Turns a (task, variables) pair into parsed JSON from a model.
//!
//! Resolution order: model, template, render, credential, provider call,
//! structured extraction. The registry lock is released before the
//! provider is awaited.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::error::GenerationError;
use super::provider::{CompletionProvider, CompletionRequest};
use super::registry::SharedRegistry;
use super::store::SharedCredentials;
use super::task::GenerationTask;
use super::template::Variables;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct GenerationExecutor {
    registry: SharedRegistry,
    credentials: SharedCredentials,
    provider: Arc<dyn CompletionProvider>,
    timeout: Duration,
    cancel: Option<CancellationToken>,
}

impl GenerationExecutor {
    pub fn new(
        registry: SharedRegistry,
        credentials: SharedCredentials,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            registry,
            credentials,
            provider,
            timeout: DEFAULT_TIMEOUT,
            cancel: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Abort in-flight provider calls when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub async fn execute(
        &self,
        task: GenerationTask,
        variables: &Variables,
        model_id: Option<&str>,
        template_id: Option<&str>,
    ) -> Result<Value, GenerationError> {
        let (model, prompt) = {
            let registry = self.registry.read().await;
            let Some(model) = registry.resolve_model(task, model_id).cloned() else {
                tracing::warn!(%task, "no active model");
                return Err(GenerationError::NoActiveModel { task });
            };
            let Some(template) = registry.resolve_template(task, template_id) else {
                tracing::warn!(%task, "no active template");
                return Err(GenerationError::NoActiveTemplate { task });
            };
            let prompt = registry.render_template(template, variables);
            tracing::debug!(%task, template = %template.id, model = %model.id, "rendered prompt");
            (model, prompt)
        };

        let api_key = self
            .credentials
            .read()
            .await
            .resolve(&model.credential_ref)
            .ok_or_else(|| {
                tracing::warn!(credential_ref = %model.credential_ref, "missing credential");
                GenerationError::MissingCredential {
                    credential_ref: model.credential_ref.clone(),
                }
            })?;

        let request = CompletionRequest {
            provider: model.provider,
            prompt,
            model: model.provider_model.clone(),
            settings: model.settings.clone(),
            api_key,
        };

        let text = self.call_provider(&request).await?;

        extract_structured(&text).map_err(|detail| {
            tracing::warn!(%task, model = %model.id, %detail, "unparseable model response");
            GenerationError::MalformedResponse { detail }
        })
    }

    async fn call_provider(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let call = tokio::time::timeout(self.timeout, self.provider.complete(request));
        let outcome = match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Err(GenerationError::Cancelled),
                outcome = call => outcome,
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "provider call failed");
                Err(GenerationError::Provider(e))
            }
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "provider call timed out");
                Err(GenerationError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Pull a JSON value out of free-form model output.
///
/// A fenced block tagged `json` wins; otherwise the first balanced
/// `{...}` span is used. Braces inside JSON strings are ignored.
pub fn extract_structured(text: &str) -> Result<Value, String> {
    let candidate = fenced_json(text)
        .or_else(|| first_object_span(text))
        .ok_or_else(|| "no JSON object found in response".to_string())?;
    serde_json::from_str(candidate).map_err(|e| e.to_string())
}

fn fenced_json(text: &str) -> Option<&str> {
    const FENCE: &str = "```json";
    let start = text.find(FENCE)? + FENCE.len();
    let body = &text[start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn first_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
