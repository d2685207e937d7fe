//! Ollama backend for embeddings and chat completions

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::types::TokenUsage;

use super::backend::{ChatMessage, Completion, ModelBackend};
use super::registry::ProviderKind;

/// Backend talking to a local Ollama server
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    embed_model: String,
    chat_model: String,
    name: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OllamaBackend {
    /// Create a backend from one provider entry
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            embed_model: config.embed_model.clone(),
            chat_model: config.chat_model.clone(),
            name: config.name.clone(),
        })
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&json!({
                "model": self.embed_model,
                "prompt": text,
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

        let parsed: EmbedResponse = response.json().await?;
        if parsed.embedding.is_empty() {
            return Err(Error::provider(&self.name, "embed", "empty embedding"));
        }
        Ok(parsed.embedding)
    }

    async fn complete(&self, messages: &[ChatMessage], max_tokens: usize) -> Result<Completion> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&json!({
                "model": self.chat_model,
                "messages": messages,
                "stream": false,
                "options": { "num_predict": max_tokens },
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

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| Error::provider(&self.name, "complete", "response had no message"))?;

        Ok(Completion {
            text,
            usage: TokenUsage {
                prompt_tokens: parsed.prompt_eval_count,
                completion_tokens: parsed.eval_count,
            },
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn name(&self) -> &str {
        &self.name
    }
}
