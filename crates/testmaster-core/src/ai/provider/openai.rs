//! Client for endpoints speaking the OpenAI `chat/completions` protocol.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{CompletionProvider, CompletionRequest, ProviderError, join_url, status_error};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

fn request_body(request: &CompletionRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": [
            {"role": "user", "content": request.prompt}
        ],
    });
    let settings = &request.settings;
    if let Some(t) = settings.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(n) = settings.max_tokens {
        body["max_tokens"] = json!(n);
    }
    if let Some(p) = settings.top_p {
        body["top_p"] = json!(p);
    }
    body
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let base = request
            .settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL);
        let url = join_url(base, "chat/completions");

        tracing::debug!(model = %request.model, "calling chat/completions");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&request.api_key)
            .json(&request_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidBody(e.to_string()))?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidBody("missing choices[0].message.content".into()))
    }
}
