//! Model backend trait: the uniform embedding + chat contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::TokenUsage;

use super::registry::ProviderKind;

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A chat completion with its token usage
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Trait for one language-model backend
///
/// Implementations:
/// - `OllamaBackend`: local Ollama server
/// - `OpenAiBackend`: OpenAI-compatible HTTP endpoint
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate a chat completion
    async fn complete(&self, messages: &[ChatMessage], max_tokens: usize) -> Result<Completion>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Backend kind
    fn kind(&self) -> ProviderKind;

    /// Backend name for logging
    fn name(&self) -> &str;
}
