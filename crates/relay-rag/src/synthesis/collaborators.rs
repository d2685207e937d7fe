//! Compression and fact-checking collaborators

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::providers::{ChatMessage, ProviderGateway};

/// Shrinks candidate text so more candidates fit the context budget
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Compress text toward roughly `target_tokens`
    async fn compress(
        &self,
        text: &str,
        target_tokens: usize,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// Flags claims in the answer that the context does not support
#[async_trait]
pub trait FactChecker: Send + Sync {
    async fn verify(
        &self,
        answer: &str,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>>;
}

/// LLM-backed compressor using the gateway's chat capability
pub struct LlmCompressor {
    gateway: Arc<ProviderGateway>,
}

impl LlmCompressor {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Compressor for LlmCompressor {
    async fn compress(
        &self,
        text: &str,
        target_tokens: usize,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if super::context::estimate_tokens(text) <= target_tokens {
            return Ok(text.to_string());
        }

        let messages = [
            ChatMessage::system(
                "Condense the passage below, keeping every concrete fact, number, \
                 and name. Reply with the condensed passage only.",
            ),
            ChatMessage::user(text.to_string()),
        ];
        let (completion, _) = self
            .gateway
            .complete(&messages, target_tokens, cancel)
            .await?;
        Ok(completion.text.trim().to_string())
    }
}

/// LLM-backed fact checker
///
/// Asks the model to list unsupported claims as a JSON array of strings.
/// Unparsable output degrades to an empty list.
pub struct LlmFactChecker {
    gateway: Arc<ProviderGateway>,
}

impl LlmFactChecker {
    pub fn new(gateway: Arc<ProviderGateway>) -> Self {
        Self { gateway }
    }
}

const VERIFY_MAX_TOKENS: usize = 400;

#[async_trait]
impl FactChecker for LlmFactChecker {
    async fn verify(
        &self,
        answer: &str,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let messages = [
            ChatMessage::system(
                "Compare the answer against the context. List every claim in the \
                 answer that the context does not support, as a JSON array of \
                 strings. Reply with the JSON array only; reply [] if every claim \
                 is supported.",
            ),
            ChatMessage::user(format!("CONTEXT:\n{context}\n\nANSWER:\n{answer}")),
        ];

        let (completion, _) = self
            .gateway
            .complete(&messages, VERIFY_MAX_TOKENS, cancel)
            .await?;

        match extract_json_array(&completion.text) {
            Some(claims) => Ok(claims),
            None => {
                tracing::warn!("fact-check output was not a JSON array, treating as no findings");
                Ok(Vec::new())
            }
        }
    }
}

/// Pull the first JSON array of strings out of model output
fn extract_json_array(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_array_from_noisy_output() {
        let text = "Here are the unsupported claims:\n[\"the sky is green\"]\nDone.";
        assert_eq!(
            extract_json_array(text),
            Some(vec!["the sky is green".to_string()])
        );
    }

    #[test]
    fn empty_array_parses() {
        assert_eq!(extract_json_array("[]"), Some(Vec::new()));
    }

    #[test]
    fn garbage_yields_none() {
        assert_eq!(extract_json_array("no array here"), None);
        assert_eq!(extract_json_array("] backwards ["), None);
    }
}
