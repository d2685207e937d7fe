//! OpenAI-compatible backend
//!
//! Works against OpenAI, Azure OpenAI, vLLM, LM Studio, and any endpoint
//! that follows the OpenAI embeddings / chat completions API format.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::types::TokenUsage;

use super::backend::{ChatMessage, Completion, ModelBackend};
use super::registry::ProviderKind;

/// Backend talking to an OpenAI-compatible endpoint
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    embed_model: String,
    chat_model: String,
    name: String,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct CompletionsResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<UsageData>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct UsageData {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiBackend {
    /// Create a backend from one provider entry
    ///
    /// The API key is read from the configured environment variable; local
    /// endpoints fall back to a dummy bearer token.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let is_local =
            config.base_url.contains("localhost") || config.base_url.contains("127.0.0.1");

        let api_key = config
            .api_key_env
            .as_ref()
            .and_then(|env| std::env::var(env).ok())
            .or_else(|| is_local.then(|| "local".to_string()))
            .ok_or_else(|| {
                Error::Config(format!(
                    "provider '{}': API key env var {} not set",
                    config.name,
                    config.api_key_env.as_deref().unwrap_or("(none)")
                ))
            })?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            embed_model: config.embed_model.clone(),
            chat_model: config.chat_model.clone(),
            name: config.name.clone(),
        })
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.embed_model,
                "input": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::provider(
                &self.name,
                "embed",
                format!("HTTP {}", response.status()),
            ));
        }

        let parsed: EmbeddingsResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::provider(&self.name, "embed", "response had no embedding"))
    }

    async fn complete(&self, messages: &[ChatMessage], max_tokens: usize) -> Result<Completion> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.chat_model,
                "messages": messages,
                "max_tokens": max_tokens,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::provider(
                &self.name,
                "complete",
                format!("HTTP {}", response.status()),
            ));
        }

        let parsed: CompletionsResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::provider(&self.name, "complete", "response had no choices"))?;

        let usage = parsed.usage.unwrap_or_default();
        Ok(Completion {
            text,
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn name(&self) -> &str {
        &self.name
    }
}
