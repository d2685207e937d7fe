//! Retrieved candidates and rerank output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One retrieved unit: a chunk of a source document with its scores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Source document ID
    pub document_id: Uuid,
    /// Chunk index within the document
    pub chunk_index: u32,
    /// Text span of the chunk
    pub text: String,
    /// Chunk embedding, used for the MMR diversity term (may be empty)
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Vector search score in [0, 1], if this modality returned the chunk
    pub vector_score: Option<f32>,
    /// Keyword search score in [0, 1], if this modality returned the chunk
    pub keyword_score: Option<f32>,
    /// Fused score in [0, 1]
    pub fused_score: f32,
    /// Last-modified timestamp of the source, for recency weighting
    pub modified_at: Option<DateTime<Utc>>,
}

impl Candidate {
    /// Dedup key: candidates referring to the same (document, chunk) are one unit
    pub fn key(&self) -> CandidateKey {
        CandidateKey {
            document_id: self.document_id,
            chunk_index: self.chunk_index,
        }
    }

    /// Stable identifier string, used for deterministic tie-breaking
    pub fn id(&self) -> String {
        format!("{}:{}", self.document_id, self.chunk_index)
    }
}

/// Identity of a retrieval unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateKey {
    pub document_id: Uuid,
    pub chunk_index: u32,
}

/// One reranked candidate with its score decomposition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    /// The candidate, score-annotated by the reranker
    pub candidate: Candidate,
    /// Final rank, 0-based
    pub rank: usize,
    /// Relevance component at selection time (recency-blended if enabled)
    pub relevance: f32,
    /// Diversity penalty subtracted at selection time
    pub diversity_penalty: f32,
    /// The MMR score the candidate was selected with
    pub mmr_score: f32,
}

/// Ordered rerank output, length <= top_k
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankedResult {
    pub items: Vec<RankedCandidate>,
}

impl RankedResult {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Fused score of the top-ranked candidate, 0 when empty
    pub fn top_score(&self) -> f32 {
        self.items
            .first()
            .map(|r| r.candidate.fused_score)
            .unwrap_or(0.0)
    }
}
