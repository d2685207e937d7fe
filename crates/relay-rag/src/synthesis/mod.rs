//! Answer synthesis: context packing, generation, citations, refinement

pub mod citation;
pub mod collaborators;
pub mod context;
pub mod prompt;

pub use citation::CitationParse;
pub use collaborators::{Compressor, FactChecker, LlmCompressor, LlmFactChecker};
pub use context::{estimate_tokens, SynthesisContext};
pub use prompt::PromptBuilder;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::SynthesisConfig;
use crate::error::Result;
use crate::providers::ProviderGateway;
use crate::types::{answer::DECLINE_ANSWER, Citation, Query, RankedResult, TokenUsage};

/// Synthesis output before the orchestrator attaches run telemetry
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SynthesisOutcome {
    pub text: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub usage: TokenUsage,
    /// Backend that produced the kept attempt; None when declined
    pub provider: Option<String>,
    /// True when no provider call was made because retrieval was empty
    pub declined: bool,
    pub unsupported_claims: Vec<String>,
}

impl SynthesisOutcome {
    fn declined() -> Self {
        Self {
            text: DECLINE_ANSWER.to_string(),
            citations: Vec::new(),
            confidence: 0.0,
            usage: TokenUsage::default(),
            provider: None,
            declined: true,
            unsupported_claims: Vec::new(),
        }
    }
}

/// Produces a cited, confidence-scored answer from reranked candidates
pub struct Synthesizer {
    gateway: Arc<ProviderGateway>,
    config: SynthesisConfig,
    compressor: Option<Arc<dyn Compressor>>,
    fact_checker: Option<Arc<dyn FactChecker>>,
}

impl Synthesizer {
    pub fn new(gateway: Arc<ProviderGateway>, config: SynthesisConfig) -> Self {
        let compressor = config
            .enable_contextual_compression
            .then(|| Arc::new(LlmCompressor::new(Arc::clone(&gateway))) as Arc<dyn Compressor>);
        let fact_checker = config
            .enable_fact_checking
            .then(|| Arc::new(LlmFactChecker::new(Arc::clone(&gateway))) as Arc<dyn FactChecker>);
        Self {
            gateway,
            config,
            compressor,
            fact_checker,
        }
    }

    /// Replace the compression collaborator
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Replace the fact-check collaborator
    pub fn with_fact_checker(mut self, fact_checker: Arc<dyn FactChecker>) -> Self {
        self.fact_checker = Some(fact_checker);
        self
    }

    /// Synthesize an answer
    ///
    /// An empty ranked result produces a decline-to-answer response without
    /// any provider call. Low-confidence answers are retried up to
    /// `max_refinement_iterations` extra times, keeping the best attempt.
    pub async fn synthesize(
        &self,
        query: &Query,
        ranked: &RankedResult,
        cancel: &CancellationToken,
    ) -> Result<SynthesisOutcome> {
        if ranked.is_empty() {
            tracing::info!("empty ranked result, declining to answer");
            return Ok(SynthesisOutcome::declined());
        }

        let context = context::build_context(
            ranked,
            self.config.max_context_length,
            self.compressor.as_deref(),
            cancel,
        )
        .await?;
        let rendered = PromptBuilder::render_context(&context);
        let top_score = ranked.top_score();

        let mut usage = TokenUsage::default();
        let mut best: Option<(String, Vec<Citation>, f32, String)> = None;

        let attempts = 1 + self.config.max_refinement_iterations;
        for attempt in 0..attempts {
            let hint = (attempt > 0).then(|| PromptBuilder::refinement_hint(attempt));
            let messages = PromptBuilder::build_messages(
                &query.text,
                &rendered,
                self.config.include_citations,
                hint.as_deref(),
            );

            let (completion, provider) = self
                .gateway
                .complete(&messages, self.config.max_answer_tokens, cancel)
                .await?;
            usage.add(completion.usage);

            let (citations, confidence) = self.score_attempt(&completion.text, &context, top_score);
            tracing::debug!(
                provider = provider.as_str(),
                "synthesis attempt {attempt}: confidence {confidence:.2}, {} citations",
                citations.len()
            );

            let better = best
                .as_ref()
                .map(|(_, _, best_confidence, _)| confidence > *best_confidence)
                .unwrap_or(true);
            if better {
                best = Some((completion.text, citations, confidence, provider));
            }

            if best.as_ref().is_some_and(|(_, _, c, _)| *c >= self.config.confidence_threshold) {
                break;
            }
        }

        let Some((text, citations, confidence, provider)) = best else {
            return Err(crate::error::Error::internal("no synthesis attempt ran"));
        };

        let unsupported_claims = match &self.fact_checker {
            Some(checker) => match checker.verify(&text, &rendered, cancel).await {
                Ok(claims) => {
                    if !claims.is_empty() {
                        tracing::warn!("fact-check flagged {} unsupported claims", claims.len());
                    }
                    claims
                }
                Err(crate::error::Error::Cancelled) => return Err(crate::error::Error::Cancelled),
                Err(e) => {
                    // Verification is best-effort
                    tracing::warn!("fact-check failed: {e}");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(SynthesisOutcome {
            text,
            citations,
            confidence,
            usage,
            provider: Some(provider),
            declined: false,
            unsupported_claims,
        })
    }

    /// Parse citations and score one attempt
    fn score_attempt(
        &self,
        text: &str,
        context: &SynthesisContext,
        top_score: f32,
    ) -> (Vec<Citation>, f32) {
        if !self.config.include_citations {
            // Without citation markers the heuristic has no signal; fall
            // back to the top candidate's score
            return (Vec::new(), top_score);
        }

        match citation::parse_citations(text, context) {
            CitationParse::Parsed(citations) => {
                let confidence = citation::confidence(text, &citations, top_score);
                (citations, confidence)
            }
            CitationParse::Unparsable => {
                tracing::warn!("answer contained no usable citation markers");
                (Vec::new(), 0.0)
            }
        }
    }
}
