//! Pipeline orchestration
//!
//! Sequences the stages per request, owns per-stage caching and fallback
//! policy, propagates cancellation, and records timing and token telemetry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::analysis::QueryAnalyzer;
use crate::cache::{CacheOutcome, Fingerprint, StageCache};
use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::metrics::MetricsRegistry;
use crate::providers::ProviderGateway;
use crate::rerank::Reranker;
use crate::retrieval::{DocumentStore, Retriever};
use crate::synthesis::{Compressor, FactChecker, SynthesisOutcome, Synthesizer};
use crate::types::{
    AnalyzedQuery, Answer, CacheReport, Candidate, PipelineStatus, Query, StageTimings,
};

/// Stage of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Analyzing,
    Retrieving,
    Reranking,
    Synthesizing,
    Done,
    Failed,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Analyzing => "analysis",
            Self::Retrieving => "retrieval",
            Self::Reranking => "reranking",
            Self::Synthesizing => "synthesis",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Mutable per-run state shared with the deadline watcher
struct RunState {
    stage: RwLock<PipelineStage>,
    timings: RwLock<StageTimings>,
}

impl RunState {
    fn new() -> Self {
        Self {
            stage: RwLock::new(PipelineStage::Analyzing),
            timings: RwLock::new(StageTimings::default()),
        }
    }

    fn enter(&self, stage: PipelineStage) {
        *self.stage.write() = stage;
    }

    fn stage(&self) -> PipelineStage {
        *self.stage.read()
    }

    fn timings(&self) -> StageTimings {
        *self.timings.read()
    }
}

/// Sequences the five stages per request
pub struct Orchestrator {
    analyzer: QueryAnalyzer,
    retriever: Retriever,
    reranker: Reranker,
    synthesizer: Synthesizer,
    cache: Arc<StageCache>,
    metrics: Arc<MetricsRegistry>,
    config: RagConfig,
}

impl Orchestrator {
    /// Build an orchestrator from its collaborators
    pub fn new(
        config: RagConfig,
        gateway: Arc<ProviderGateway>,
        store: Arc<dyn DocumentStore>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        config.validate()?;

        let analyzer = QueryAnalyzer::new(Arc::clone(&gateway), config.analysis.clone());
        let retriever = Retriever::new(
            store,
            config.retrieval.clone(),
            Duration::from_secs(config.concurrency.search_timeout_secs),
        );
        let reranker = Reranker::new(config.rerank.clone());
        let synthesizer = Synthesizer::new(gateway, config.synthesis.clone());
        let cache = Arc::new(StageCache::new(&config.cache));

        Ok(Self {
            analyzer,
            retriever,
            reranker,
            synthesizer,
            cache,
            metrics,
            config,
        })
    }

    /// Replace the compression collaborator
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.synthesizer = self.synthesizer.with_compressor(compressor);
        self
    }

    /// Replace the fact-check collaborator
    pub fn with_fact_checker(mut self, fact_checker: Arc<dyn FactChecker>) -> Self {
        self.synthesizer = self.synthesizer.with_fact_checker(fact_checker);
        self
    }

    /// The stage cache, for invalidation when the corpus changes
    pub fn cache(&self) -> &Arc<StageCache> {
        &self.cache
    }

    /// The injected metrics registry
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Run the pipeline for one query
    pub async fn run(&self, query: Query) -> Result<Answer> {
        self.run_with_cancel(query, CancellationToken::new()).await
    }

    /// Run the pipeline under an external cancellation token
    ///
    /// Fatal stage errors produce a best-effort `Answer` with a `Failed`
    /// status rather than an error. Cancellation and the request deadline
    /// follow the `partial_on_cancel` policy: a partial answer when set,
    /// otherwise the error.
    pub async fn run_with_cancel(&self, query: Query, cancel: CancellationToken) -> Result<Answer> {
        self.metrics.record_request();
        let state = RunState::new();
        let child = cancel.child_token();
        let deadline = Duration::from_secs(self.config.concurrency.request_timeout_secs);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                child.cancel();
                Err(Error::Cancelled)
            }
            result = tokio::time::timeout(deadline, self.run_inner(&query, &child, &state)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => {
                        child.cancel();
                        Err(Error::Timeout(state.stage()))
                    }
                }
            }
        };

        match outcome {
            Ok(answer) => Ok(answer),
            Err(e @ (Error::Cancelled | Error::Timeout(_))) => {
                self.metrics.record_failure();
                let stage = state.stage();
                tracing::warn!("pipeline interrupted during {stage}: {e}");
                if self.config.concurrency.partial_on_cancel {
                    Ok(Answer::failed(stage, e.to_string(), state.timings()))
                } else {
                    Err(e)
                }
            }
            Err(e) => {
                self.metrics.record_failure();
                let stage = state.stage();
                tracing::error!("pipeline failed during {stage}: {e}");
                Ok(Answer::failed(stage, e.to_string(), state.timings()))
            }
        }
    }

    async fn run_inner(
        &self,
        query: &Query,
        cancel: &CancellationToken,
        state: &RunState,
    ) -> Result<Answer> {
        let mut cache_report = CacheReport::default();

        // Analyzing
        state.enter(PipelineStage::Analyzing);
        let started = Instant::now();
        let fingerprint = Fingerprint::compute("analyze", query, &self.config.analysis)?;
        let (analyzed, outcome): (AnalyzedQuery, _) = self
            .cache
            .get_or_compute(&fingerprint, || async {
                self.analyzer.analyze(query, cancel).await
            })
            .await?;
        cache_report.analysis_hit = self.note_cache(outcome);
        state.timings.write().analysis_ms = started.elapsed().as_millis() as u64;

        // Retrieving
        state.enter(PipelineStage::Retrieving);
        let started = Instant::now();
        let fingerprint = Fingerprint::compute("retrieve", &analyzed, &self.config.retrieval)?;
        let (candidates, outcome): (Vec<Candidate>, _) = self
            .cache
            .get_or_compute(&fingerprint, || async {
                self.retriever.retrieve(&analyzed, cancel).await
            })
            .await?;
        cache_report.retrieval_hit = self.note_cache(outcome);
        state.timings.write().retrieval_ms = started.elapsed().as_millis() as u64;

        // Reranking: pure in-process compute, nothing expensive to collapse
        state.enter(PipelineStage::Reranking);
        let started = Instant::now();
        let ranked = self
            .reranker
            .rerank(candidates, self.config.retrieval.default_top_k);
        state.timings.write().rerank_ms = started.elapsed().as_millis() as u64;

        // Synthesizing
        state.enter(PipelineStage::Synthesizing);
        let started = Instant::now();
        if ranked.is_empty() {
            state.timings.write().synthesis_ms = started.elapsed().as_millis() as u64;
            state.enter(PipelineStage::Done);
            self.metrics.record_decline();
            tracing::info!("no candidates passed threshold, declining");
            let mut answer = Answer::declined(state.timings());
            answer.cache = cache_report;
            return Ok(answer);
        }

        let fingerprint = Fingerprint::compute(
            "synthesize",
            &(query.text.as_str(), &ranked),
            &self.config.synthesis,
        )?;
        let (synthesis, outcome): (SynthesisOutcome, _) = self
            .cache
            .get_or_compute(&fingerprint, || async {
                self.synthesizer.synthesize(query, &ranked, cancel).await
            })
            .await?;
        cache_report.synthesis_hit = self.note_cache(outcome);
        state.timings.write().synthesis_ms = started.elapsed().as_millis() as u64;

        state.enter(PipelineStage::Done);
        let status = if synthesis.declined {
            self.metrics.record_decline();
            PipelineStatus::Declined
        } else {
            PipelineStatus::Done
        };

        Ok(Answer {
            text: synthesis.text,
            citations: synthesis.citations,
            confidence: synthesis.confidence,
            usage: synthesis.usage,
            timings: state.timings(),
            cache: cache_report,
            status,
            provider: synthesis.provider,
            unsupported_claims: synthesis.unsupported_claims,
        })
    }

    fn note_cache(&self, outcome: CacheOutcome) -> bool {
        if outcome.is_hit() {
            self.metrics.record_cache_hit();
            true
        } else {
            self.metrics.record_cache_miss();
            false
        }
    }
}
