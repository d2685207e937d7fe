//! Answer, citation, and telemetry types

use serde::{Deserialize, Serialize};

use super::candidate::CandidateKey;
use crate::pipeline::PipelineStage;

/// Fixed refusal text used when retrieval produced nothing usable
pub const DECLINE_ANSWER: &str =
    "I couldn't find relevant information in the documents to answer this question.";

/// A citation linking a span of the answer to a retrieved candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// The cited candidate
    pub candidate: CandidateKey,
    /// Character span of the citation marker in the answer text
    pub span: (usize, usize),
    /// Fused retrieval score of the cited candidate
    pub fused_score: f32,
    /// Final rank of the cited candidate after rerank
    pub rank: usize,
}

/// Token usage for one pipeline run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Accumulate usage from another call
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Which cacheable stages were served from the cache
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheReport {
    pub analysis_hit: bool,
    pub retrieval_hit: bool,
    pub synthesis_hit: bool,
}

/// Wall-clock duration per stage in milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub analysis_ms: u64,
    pub retrieval_ms: u64,
    pub rerank_ms: u64,
    pub synthesis_ms: u64,
}

impl StageTimings {
    pub fn total_ms(&self) -> u64 {
        self.analysis_ms + self.retrieval_ms + self.rerank_ms + self.synthesis_ms
    }
}

/// Terminal status of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineStatus {
    /// All stages completed
    Done,
    /// Retrieval found nothing above threshold; the answer declines
    Declined,
    /// A fatal error ended the run; the answer is best-effort partial output
    Failed { stage: PipelineStage, reason: String },
}

impl PipelineStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// The pipeline's final output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Answer text
    pub text: String,
    /// Citations parsed from the model output
    pub citations: Vec<Citation>,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Token usage across all provider calls for this run
    pub usage: TokenUsage,
    /// Wall-clock per stage
    pub timings: StageTimings,
    /// Cache hits per cacheable stage
    #[serde(default)]
    pub cache: CacheReport,
    /// Terminal status
    pub status: PipelineStatus,
    /// Name of the provider that produced the synthesis, if any
    pub provider: Option<String>,
    /// Claims the fact-check pass could not support, if it ran
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub unsupported_claims: Vec<String>,
}

impl Answer {
    /// Decline-to-answer response: no provider call was made
    pub fn declined(timings: StageTimings) -> Self {
        Self {
            text: DECLINE_ANSWER.to_string(),
            citations: Vec::new(),
            confidence: 0.0,
            usage: TokenUsage::default(),
            timings,
            cache: CacheReport::default(),
            status: PipelineStatus::Declined,
            provider: None,
            unsupported_claims: Vec::new(),
        }
    }

    /// Best-effort response for a fatally failed run
    pub fn failed(stage: PipelineStage, reason: impl Into<String>, timings: StageTimings) -> Self {
        let reason = reason.into();
        Self {
            text: format!(
                "I was unable to complete this request ({stage} failed). \
                 Please try again later."
            ),
            citations: Vec::new(),
            confidence: 0.0,
            usage: TokenUsage::default(),
            timings,
            cache: CacheReport::default(),
            status: PipelineStatus::Failed { stage, reason },
            provider: None,
            unsupported_claims: Vec::new(),
        }
    }
}
