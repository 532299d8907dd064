//! Generation capability boundary.
//!
//! Mirrors the embedding side: the orchestrator hands a fully assembled
//! [`GenerationRequest`] to a [`GenerationProvider`] and gets back a complete
//! response string. Progressive delivery is a client concern, not ours.

use async_trait::async_trait;
use serde::Deserialize;

use crate::conversation::Role;
use crate::prompt::GenerationRequest;
use crate::types::EngineError;

pub const DEFAULT_GENERATION_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError>;
}

/// Canned-response provider for tests. Can be constructed failing to
/// exercise the degraded path.
#[derive(Clone, Debug, Default)]
pub struct MockGenerationProvider {
    reply: Option<String>,
    fail: bool,
}

impl MockGenerationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// A provider whose every call fails.
    pub fn failing() -> Self {
        Self {
            reply: None,
            fail: true,
        }
    }
}

#[async_trait]
impl GenerationProvider for MockGenerationProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError> {
        if self.fail {
            return Err(EngineError::Generation(
                "mock generation failure".to_string(),
            ));
        }
        Ok(self.reply.clone().unwrap_or_else(|| {
            format!(
                "Mock reply considering {} excerpt(s).",
                request.context_blocks.len()
            )
        }))
    }
}

/// Anthropic messages API client (`POST {base_url}/v1/messages`).
///
/// Conversation history becomes alternating user/assistant messages; the
/// final user message carries the retrieval prologue followed by the
/// question, matching the prompt layout the corpus was tuned against.
#[derive(Clone)]
pub struct AnthropicGenerationProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: String,
}

impl AnthropicGenerationProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.anthropic.com".to_string(),
            api_key: api_key.into(),
            model: DEFAULT_GENERATION_MODEL.to_string(),
            max_tokens: 1024,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl GenerationProvider for AnthropicGenerationProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError> {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        for turn in &request.history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(serde_json::json!({ "role": role, "content": &turn.text }));
        }
        let user_content = format!(
            "{}\n\n---\n\nUser question: {}",
            request.context_prologue(),
            request.user_message
        );
        messages.push(serde_json::json!({ "role": "user", "content": user_content }));

        let body = serde_json::json!({
            "model": &self.model,
            "max_tokens": self.max_tokens,
            "system": &request.system_prompt,
            "messages": messages,
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| EngineError::Generation(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EngineError::Generation(format!(
                "generation service returned {status}: {detail}"
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|err| EngineError::Generation(err.to_string()))?;
        parsed
            .content
            .into_iter()
            .next()
            .map(|part| part.text)
            .ok_or_else(|| {
                EngineError::Generation("generation response contained no content".to_string())
            })
    }
}
