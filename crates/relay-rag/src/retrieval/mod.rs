//! Hybrid retrieval: concurrent vector + keyword search with score fusion

pub mod memory;

pub use memory::MemoryDocumentStore;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::types::{AnalyzedQuery, Candidate, CandidateKey};

/// Filters applied to both search modalities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Restrict to these document IDs
    pub document_ids: Option<Vec<Uuid>>,
    /// Restrict to these category tags
    pub categories: Vec<String>,
}

/// Document store collaborator
///
/// Both searches must return candidates with a normalized [0, 1] score in
/// the matching modality field.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Nearest-neighbor search over chunk embeddings
    async fn vector_search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Candidate>>;

    /// Keyword search over chunk text
    async fn keyword_search(
        &self,
        text: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Candidate>>;
}

/// Issues hybrid search and fuses the results
pub struct Retriever {
    store: Arc<dyn DocumentStore>,
    config: RetrievalConfig,
    search_timeout: Duration,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: RetrievalConfig,
        search_timeout: Duration,
    ) -> Self {
        Self {
            store,
            config,
            search_timeout,
        }
    }

    /// Retrieve, fuse, threshold, and deduplicate candidates
    ///
    /// Vector and keyword searches run concurrently with independent
    /// timeouts. If every vector search fails and `fallback_to_keyword` is
    /// set, keyword-only results are returned instead of failing the stage.
    pub async fn retrieve(
        &self,
        analyzed: &AnalyzedQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>> {
        let budget = self.config.default_top_k * self.config.candidate_multiplier;
        let filters = SearchFilters {
            document_ids: analyzed.query.document_filter.clone(),
            categories: analyzed.query.categories.clone(),
        };

        let vector_part = self.vector_search_all(analyzed, budget, &filters, cancel);
        let keyword_part = async {
            if self.config.enable_hybrid_search {
                self.run_keyword(analyzed, budget, &filters, cancel).await
            } else {
                Ok(Vec::new())
            }
        };
        let (vector_results, keyword_results) = tokio::join!(vector_part, keyword_part);

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match vector_results {
            Ok(vector_hits) => {
                let keyword_hits = keyword_results.unwrap_or_else(|e| {
                    // Keyword failure alone never fails the stage
                    tracing::warn!("keyword search failed, continuing vector-only: {e}");
                    Vec::new()
                });
                let fused = self.fuse(vector_hits, keyword_hits);
                Ok(self.finish(fused, budget))
            }
            Err(e) if self.config.fallback_to_keyword => {
                tracing::warn!("vector search failed, falling back to keyword-only: {e}");
                let keyword_hits = if self.config.enable_hybrid_search {
                    // Both modalities down means the store is unavailable
                    keyword_results.map_err(|_| e)?
                } else {
                    // Hybrid was off; issue the degraded-mode search now
                    self.run_keyword(analyzed, budget, &filters, cancel).await?
                };
                let fused = self.fuse(Vec::new(), keyword_hits);
                Ok(self.finish(fused, budget))
            }
            Err(e) => Err(e),
        }
    }

    /// Run one vector search per seed; succeeds if any seed search succeeds
    async fn vector_search_all(
        &self,
        analyzed: &AnalyzedQuery,
        budget: usize,
        filters: &SearchFilters,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>> {
        let searches = analyzed.seeds.iter().map(|seed| {
            self.with_deadline(
                self.store.vector_search(&seed.embedding, budget, filters),
                cancel,
            )
        });
        let outcomes = futures::future::join_all(searches).await;

        let mut hits = Vec::new();
        let mut last_err = None;
        for outcome in outcomes {
            match outcome {
                Ok(mut seed_hits) => hits.append(&mut seed_hits),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!("vector search seed failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        match (hits.is_empty(), last_err) {
            (true, Some(e)) => Err(e),
            _ => Ok(hits),
        }
    }

    async fn run_keyword(
        &self,
        analyzed: &AnalyzedQuery,
        budget: usize,
        filters: &SearchFilters,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>> {
        // Expansion terms widen keyword recall
        let mut text = analyzed.search_text().to_string();
        for term in &analyzed.expansion_terms {
            if !text.to_lowercase().contains(term.as_str()) {
                text.push(' ');
                text.push_str(term);
            }
        }

        self.with_deadline(self.store.keyword_search(&text, budget, filters), cancel)
            .await
    }

    async fn with_deadline<T>(
        &self,
        search: impl std::future::Future<Output = Result<T>>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            outcome = tokio::time::timeout(self.search_timeout, search) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::store("search deadline exceeded")),
            },
        }
    }

    /// Fuse vector and keyword hits per (document, chunk)
    ///
    /// fused = w * vector + (1 - w) * keyword when both modalities scored
    /// the chunk, otherwise the single available score. Duplicate hits
    /// within a modality keep the best score.
    fn fuse(&self, vector_hits: Vec<Candidate>, keyword_hits: Vec<Candidate>) -> Vec<Candidate> {
        let mut merged: HashMap<CandidateKey, Candidate> = HashMap::new();

        for hit in vector_hits {
            let score = hit.vector_score.unwrap_or(hit.fused_score);
            match merged.entry(hit.key()) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    let mut candidate = hit;
                    candidate.vector_score = Some(score);
                    slot.insert(candidate);
                }
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    if existing.vector_score.unwrap_or(0.0) < score {
                        existing.vector_score = Some(score);
                    }
                }
            }
        }

        for hit in keyword_hits {
            let score = hit.keyword_score.unwrap_or(hit.fused_score);
            match merged.entry(hit.key()) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    let mut candidate = hit;
                    candidate.keyword_score = Some(score);
                    slot.insert(candidate);
                }
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    if existing.keyword_score.unwrap_or(0.0) < score {
                        existing.keyword_score = Some(score);
                    }
                    // Keyword hits carry text/embedding too if vector missed them
                    if existing.text.is_empty() {
                        existing.text = hit.text;
                    }
                    if existing.embedding.is_empty() {
                        existing.embedding = hit.embedding;
                    }
                }
            }
        }

        let weight = self.config.vector_weight;
        merged
            .into_values()
            .map(|mut candidate| {
                candidate.fused_score = fuse_scores(
                    candidate.vector_score,
                    candidate.keyword_score,
                    weight,
                );
                candidate
            })
            .collect()
    }

    /// Threshold, sort, and truncate to the candidate budget
    fn finish(&self, mut candidates: Vec<Candidate>, budget: usize) -> Vec<Candidate> {
        candidates.retain(|c| c.fused_score >= self.config.min_similarity);
        candidates.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id().cmp(&b.id()))
        });

        if !self.config.use_chunk_retrieval {
            // Document granularity: keep only the best chunk per document
            let mut seen = std::collections::HashSet::new();
            candidates.retain(|c| seen.insert(c.document_id));
        }

        candidates.truncate(budget);

        tracing::debug!(
            "retrieval produced {} candidates (budget {budget})",
            candidates.len()
        );
        candidates
    }
}

/// Fused score for one candidate
pub fn fuse_scores(vector: Option<f32>, keyword: Option<f32>, vector_weight: f32) -> f32 {
    match (vector, keyword) {
        (Some(v), Some(k)) => vector_weight * v + (1.0 - vector_weight) * k,
        (Some(v), None) => v,
        (None, Some(k)) => k,
        (None, None) => 0.0,
    }
}
