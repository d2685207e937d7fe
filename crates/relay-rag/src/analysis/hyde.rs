//! Hypothetical Document Embeddings (HyDE)
//!
//! Asks the chat model for a short hypothetical answer passage and embeds
//! it. The embedding joins the original query embedding as a second
//! retrieval seed rather than replacing it.

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::providers::{ChatMessage, ProviderGateway};

const HYDE_MAX_TOKENS: usize = 160;

/// Generate and embed a hypothetical answer passage for the query
pub async fn hypothetical_seed(
    gateway: &ProviderGateway,
    query_text: &str,
    cancel: &CancellationToken,
) -> Result<Vec<f32>> {
    let messages = [
        ChatMessage::system(
            "Write a short passage, two to three sentences, that could plausibly \
             appear in a document answering the user's question. Write the passage \
             only, with no preamble.",
        ),
        ChatMessage::user(query_text.to_string()),
    ];

    let (completion, provider) = gateway
        .complete(&messages, HYDE_MAX_TOKENS, cancel)
        .await?;
    tracing::debug!(
        provider = provider.as_str(),
        "generated hypothetical passage ({} chars)",
        completion.text.len()
    );

    let (embedding, _) = gateway.embed(completion.text.trim(), cancel).await?;
    Ok(embedding)
}
