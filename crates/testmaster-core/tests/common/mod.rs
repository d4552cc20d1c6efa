//! Helpers shared by the integration tests: a scripted completion provider
//! and a ready-made executor around it.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use testmaster_core::ai::provider::{CompletionProvider, CompletionRequest, ProviderError};
use testmaster_core::ai::{Credentials, GenerationExecutor, ModelRegistry};

/// Returns queued replies in order; the last one repeats once the queue is
/// down to a single entry.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, u16>>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new<S: AsRef<str>>(replies: &[S]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| Ok(r.as_ref().to_string())).collect()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// A provider that always answers with HTTP `status`.
    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([Err(status)])),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap()
        };
        reply.map_err(|status| ProviderError::Status {
            status,
            body: "scripted failure".into(),
        })
    }
}

pub fn executor(provider: Arc<ScriptedProvider>) -> GenerationExecutor {
    let mut credentials = Credentials::new();
    credentials.set("gemini", "test-gemini-key");
    credentials.set("openai", "test-openai-key");
    GenerationExecutor::new(
        ModelRegistry::with_builtin_defaults().into_shared(),
        credentials.into_shared(),
        provider,
    )
}

pub fn fenced(json: &str) -> String {
    format!("Here you go:\n```json\n{json}\n```\n")
}
