//! Maximal Marginal Relevance reranking

use chrono::{DateTime, Utc};

use crate::config::RerankConfig;
use crate::retrieval::memory::cosine_similarity;
use crate::types::{Candidate, RankedCandidate, RankedResult};

/// Reorders candidates balancing relevance against similarity to already
/// selected items
pub struct Reranker {
    config: RerankConfig,
}

impl Reranker {
    pub fn new(config: RerankConfig) -> Self {
        Self { config }
    }

    /// Rerank candidates down to at most `top_k` items
    pub fn rerank(&self, candidates: Vec<Candidate>, top_k: usize) -> RankedResult {
        self.rerank_at(candidates, top_k, Utc::now())
    }

    /// Rerank with an explicit clock, for deterministic recency scoring
    pub fn rerank_at(
        &self,
        candidates: Vec<Candidate>,
        top_k: usize,
        now: DateTime<Utc>,
    ) -> RankedResult {
        if candidates.is_empty() || top_k == 0 {
            return RankedResult::default();
        }

        // Relevance per candidate, recency-blended when enabled, clamped to [0, 1]
        let mut pool: Vec<Entry> = candidates
            .into_iter()
            .map(|candidate| {
                let mut relevance = candidate.fused_score;
                if self.config.enable_temporal_weighting {
                    let recency = self.recency(&candidate, now);
                    relevance = (relevance + self.config.recency_weight * recency).clamp(0.0, 1.0);
                }
                Entry {
                    id: candidate.id(),
                    original_rank: 0,
                    relevance,
                    candidate,
                }
            })
            .collect();

        // Original fused-score rank is the first tie-breaker
        let mut order: Vec<usize> = (0..pool.len()).collect();
        order.sort_by(|&a, &b| {
            pool[b]
                .candidate
                .fused_score
                .partial_cmp(&pool[a].candidate.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| pool[a].id.cmp(&pool[b].id))
        });
        for (rank, &index) in order.iter().enumerate() {
            pool[index].original_rank = rank;
        }

        let lambda = self.config.mmr_lambda;
        let pure_relevance = !self.config.consider_diversity || lambda >= 1.0;

        if pure_relevance {
            // No diversity term ever applied
            pool.sort_by(|a, b| {
                b.relevance
                    .partial_cmp(&a.relevance)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.original_rank.cmp(&b.original_rank))
                    .then_with(|| a.id.cmp(&b.id))
            });
            let items = pool
                .into_iter()
                .take(top_k)
                .enumerate()
                .map(|(rank, entry)| RankedCandidate {
                    relevance: entry.relevance,
                    diversity_penalty: 0.0,
                    mmr_score: entry.relevance,
                    rank,
                    candidate: entry.candidate,
                })
                .collect();
            return RankedResult { items };
        }

        let mut selected: Vec<RankedCandidate> = Vec::with_capacity(top_k.min(pool.len()));
        while selected.len() < top_k && !pool.is_empty() {
            let mut best: Option<(usize, f32, f32)> = None;

            for (index, entry) in pool.iter().enumerate() {
                // Highest similarity to anything already selected; 0 when
                // nothing is selected yet or embeddings are missing
                let max_sim = selected
                    .iter()
                    .map(|s| {
                        cosine_similarity(&entry.candidate.embedding, &s.candidate.embedding)
                            .max(0.0)
                    })
                    .fold(0.0f32, f32::max);

                let penalty = (1.0 - lambda) * max_sim;
                let mmr = lambda * entry.relevance - penalty;

                let replace = match best {
                    None => true,
                    Some((best_index, best_mmr, _)) => {
                        match mmr.partial_cmp(&best_mmr).unwrap_or(std::cmp::Ordering::Equal) {
                            std::cmp::Ordering::Greater => true,
                            std::cmp::Ordering::Less => false,
                            std::cmp::Ordering::Equal => {
                                let best_entry = &pool[best_index];
                                entry
                                    .original_rank
                                    .cmp(&best_entry.original_rank)
                                    .then_with(|| entry.id.cmp(&best_entry.id))
                                    .is_lt()
                            }
                        }
                    }
                };
                if replace {
                    best = Some((index, mmr, penalty));
                }
            }

            let Some((index, mmr, penalty)) = best else {
                break;
            };
            let entry = pool.swap_remove(index);
            selected.push(RankedCandidate {
                rank: selected.len(),
                relevance: entry.relevance,
                diversity_penalty: penalty,
                mmr_score: mmr,
                candidate: entry.candidate,
            });
        }

        RankedResult { items: selected }
    }

    /// Recency normalized to [0, 1] by exponential age decay
    fn recency(&self, candidate: &Candidate, now: DateTime<Utc>) -> f32 {
        let Some(modified_at) = candidate.modified_at else {
            return 0.0;
        };
        let age_days =
            (now.signed_duration_since(modified_at).num_seconds().max(0) as f32) / 86_400.0;
        let half_life = self.config.recency_half_life_days.max(f32::EPSILON);
        (-std::f32::consts::LN_2 * age_days / half_life).exp()
    }
}

struct Entry {
    candidate: Candidate,
    id: String,
    original_rank: usize,
    relevance: f32,
}
