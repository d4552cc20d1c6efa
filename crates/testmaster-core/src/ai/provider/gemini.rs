//! Google Generative Language API client (`models/{model}:generateContent`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CompletionProvider, CompletionRequest, ProviderError, join_url, status_error};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(rename = "topP", skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(rename = "topK", skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

pub struct GeminiClient {
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn endpoint(request: &CompletionRequest) -> String {
        let base = request
            .settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL);
        join_url(
            base,
            &format!("models/{}:generateContent", request.model.trim()),
        )
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for GeminiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let url = Self::endpoint(request);
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.settings.temperature,
                max_output_tokens: request.settings.max_tokens,
                top_p: request.settings.top_p,
                top_k: request.settings.top_k,
            },
        };

        tracing::debug!(model = %request.model, "calling gemini generateContent");
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &request.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidBody(e.to_string()))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderError::InvalidBody(
                "no candidate text in generateContent response".to_string(),
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::model::{ModelSettings, ProviderKind};
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::{Value, json};

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1beta")
    }

    fn request(base_url: String) -> CompletionRequest {
        CompletionRequest {
            provider: ProviderKind::Gemini,
            prompt: "say hi".into(),
            model: "gemini-1.5-flash".into(),
            settings: ModelSettings {
                temperature: Some(0.2),
                base_url: Some(base_url),
                ..Default::default()
            },
            api_key: "k-123".into(),
        }
    }

    #[tokio::test]
    async fn returns_candidate_text() {
        let app = Router::new().route(
            "/v1beta/models/{action}",
            post(|headers: HeaderMap, body: axum::Json<Value>| async move {
                assert_eq!(headers["x-goog-api-key"], "k-123");
                assert_eq!(body["contents"][0]["parts"][0]["text"], "say hi");
                assert!(body["generationConfig"]["temperature"].is_number());
                assert!(body["generationConfig"].get("topK").is_none());
                axum::Json(json!({
                    "candidates": [{"content": {"parts": [{"text": "hel"}, {"text": "lo"}]}}]
                }))
            }),
        );
        let base = spawn(app).await;

        let text = GeminiClient::new().complete(&request(base)).await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let app = Router::new().route(
            "/v1beta/models/{action}",
            post(|| async { (StatusCode::FORBIDDEN, "API key not valid") }),
        );
        let base = spawn(app).await;

        let err = GeminiClient::new()
            .complete(&request(base))
            .await
            .unwrap_err();
        match err {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "API key not valid");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_candidates_is_invalid_body() {
        let app = Router::new().route(
            "/v1beta/models/{action}",
            post(|| async { axum::Json(json!({"candidates": []})) }),
        );
        let base = spawn(app).await;

        let err = GeminiClient::new()
            .complete(&request(base))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidBody(_)));
    }
}
