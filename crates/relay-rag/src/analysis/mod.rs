//! Query analysis: expansion, rewriting, and HyDE seeding

pub mod expansion;
pub mod hyde;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::providers::{ChatMessage, ProviderGateway};
use crate::types::{AnalyzedQuery, Query, QuerySeed};

const REWRITE_MAX_TOKENS: usize = 120;

/// Analyzes a raw query into retrieval seeds and expansion terms
pub struct QueryAnalyzer {
    gateway: Arc<ProviderGateway>,
    config: AnalysisConfig,
}

impl QueryAnalyzer {
    pub fn new(gateway: Arc<ProviderGateway>, config: AnalysisConfig) -> Self {
        Self { gateway, config }
    }

    /// Analyze a query
    ///
    /// Rewriting and HyDE failures are non-fatal: the original text and the
    /// plain query seed are used instead. Embedding the query itself must
    /// succeed, so provider exhaustion here fails the stage.
    pub async fn analyze(&self, query: &Query, cancel: &CancellationToken) -> Result<AnalyzedQuery> {
        let expansion_terms = expansion::expand_terms(
            &query.text,
            self.config.max_expansion_terms,
            self.config.include_synonyms,
        );

        let rewritten = if self.config.enable_query_rewriting {
            self.rewrite(query, cancel).await
        } else {
            None
        };

        let embed_text = rewritten.as_deref().unwrap_or(&query.text);
        let (query_embedding, provider) = self.gateway.embed(embed_text, cancel).await?;
        tracing::debug!(
            provider = provider.as_str(),
            "embedded query ({} expansion terms)",
            expansion_terms.len()
        );

        let mut seeds = vec![QuerySeed {
            label: "query".to_string(),
            embedding: query_embedding,
        }];

        if self.config.enable_hyde {
            match hyde::hypothetical_seed(&self.gateway, embed_text, cancel).await {
                Ok(embedding) => seeds.push(QuerySeed {
                    label: "hyde".to_string(),
                    embedding,
                }),
                Err(crate::error::Error::Cancelled) => return Err(crate::error::Error::Cancelled),
                Err(e) => {
                    tracing::warn!("HyDE seeding failed, continuing with query seed only: {e}");
                }
            }
        }

        Ok(AnalyzedQuery {
            query: query.clone(),
            expansion_terms,
            rewritten,
            seeds,
        })
    }

    /// Ask the chat model for a clarified restatement; failure is absorbed
    async fn rewrite(&self, query: &Query, cancel: &CancellationToken) -> Option<String> {
        let mut messages = vec![ChatMessage::system(
            "Restate the user's question as a single clear, self-contained \
             search query. Reply with the restated query only.",
        )];
        for (question, answer) in query.history.iter().rev().take(3).rev() {
            messages.push(ChatMessage::user(question.clone()));
            messages.push(ChatMessage::assistant(answer.clone()));
        }
        messages.push(ChatMessage::user(query.text.clone()));

        match self
            .gateway
            .complete(&messages, REWRITE_MAX_TOKENS, cancel)
            .await
        {
            Ok((completion, _)) => {
                let text = completion.text.trim();
                if text.is_empty() {
                    None
                } else {
                    Some(text.to_string())
                }
            }
            Err(e) => {
                tracing::warn!("query rewriting failed, using original text: {e}");
                None
            }
        }
    }
}
