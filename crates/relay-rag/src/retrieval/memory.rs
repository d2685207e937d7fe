//! In-memory document store
//!
//! Reference implementation of the store collaborator: cosine similarity
//! over stored chunk embeddings and normalized term-overlap keyword search.
//! Production deployments wire in a real vector database instead.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::Candidate;

use super::{DocumentStore, SearchFilters};

/// One stored chunk
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub document_id: Uuid,
    pub chunk_index: u32,
    pub text: String,
    pub embedding: Vec<f32>,
    pub categories: Vec<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// In-memory document store
pub struct MemoryDocumentStore {
    chunks: RwLock<Vec<StoredChunk>>,
    dimensions: usize,
}

impl MemoryDocumentStore {
    /// Create a store expecting embeddings of the given width
    pub fn new(dimensions: usize) -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            dimensions,
        }
    }

    /// Insert a chunk
    pub fn insert(&self, chunk: StoredChunk) -> Result<()> {
        if chunk.embedding.len() != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: chunk.embedding.len(),
            });
        }
        self.chunks.write().push(chunk);
        Ok(())
    }

    /// Number of stored chunks
    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }

    fn matches_filters(chunk: &StoredChunk, filters: &SearchFilters) -> bool {
        if let Some(doc_ids) = &filters.document_ids {
            if !doc_ids.contains(&chunk.document_id) {
                return false;
            }
        }
        if !filters.categories.is_empty()
            && !filters
                .categories
                .iter()
                .any(|c| chunk.categories.contains(c))
        {
            return false;
        }
        true
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn vector_search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Candidate>> {
        if embedding.len() != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }

        let chunks = self.chunks.read();
        let mut results: Vec<Candidate> = chunks
            .iter()
            .filter(|chunk| Self::matches_filters(chunk, filters))
            .map(|chunk| {
                // Cosine similarity mapped from [-1, 1] to [0, 1]
                let similarity = (cosine_similarity(embedding, &chunk.embedding) + 1.0) / 2.0;
                Candidate {
                    document_id: chunk.document_id,
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                    embedding: chunk.embedding.clone(),
                    vector_score: Some(similarity),
                    keyword_score: None,
                    fused_score: similarity,
                    modified_at: chunk.modified_at,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }

    async fn keyword_search(
        &self,
        text: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Candidate>> {
        let terms: HashSet<String> = text
            .unicode_words()
            .map(|w| w.to_lowercase())
            .filter(|w| w.len() >= 2)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.chunks.read();
        let mut results: Vec<Candidate> = chunks
            .iter()
            .filter(|chunk| Self::matches_filters(chunk, filters))
            .filter_map(|chunk| {
                let chunk_terms: HashSet<String> = chunk
                    .text
                    .unicode_words()
                    .map(|w| w.to_lowercase())
                    .collect();
                let overlap = terms.intersection(&chunk_terms).count();
                if overlap == 0 {
                    return None;
                }
                let score = overlap as f32 / terms.len() as f32;
                Some(Candidate {
                    document_id: chunk.document_id,
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                    embedding: chunk.embedding.clone(),
                    vector_score: None,
                    keyword_score: Some(score),
                    fused_score: score,
                    modified_at: chunk.modified_at,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }
}

/// Cosine similarity between two equal-width vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc: Uuid, index: u32, text: &str, embedding: Vec<f32>) -> StoredChunk {
        StoredChunk {
            document_id: doc,
            chunk_index: index,
            text: text.to_string(),
            embedding,
            categories: Vec::new(),
            modified_at: None,
        }
    }

    #[tokio::test]
    async fn vector_search_orders_by_similarity() {
        let store = MemoryDocumentStore::new(2);
        let doc = Uuid::new_v4();
        store.insert(chunk(doc, 0, "close", vec![1.0, 0.0])).unwrap();
        store.insert(chunk(doc, 1, "far", vec![0.0, 1.0])).unwrap();

        let results = store
            .vector_search(&[1.0, 0.1], 10, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results[0].text, "close");
        assert!(results[0].fused_score > results[1].fused_score);
    }

    #[tokio::test]
    async fn mismatched_query_width_is_rejected() {
        let store = MemoryDocumentStore::new(3);
        let err = store
            .vector_search(&[1.0, 0.0], 10, &SearchFilters::default())
            .await
            .unwrap_err();
        match err {
            Error::DimensionMismatch { expected, actual } => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn mismatched_insert_width_is_rejected() {
        let store = MemoryDocumentStore::new(3);
        let err = store
            .insert(chunk(Uuid::new_v4(), 0, "x", vec![1.0]))
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn keyword_search_scores_by_overlap() {
        let store = MemoryDocumentStore::new(1);
        let doc = Uuid::new_v4();
        store
            .insert(chunk(doc, 0, "the refund policy allows returns", vec![0.0]))
            .unwrap();
        store
            .insert(chunk(doc, 1, "shipping times vary", vec![0.0]))
            .unwrap();

        let results = store
            .keyword_search("refund policy", 10, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_index, 0);
        assert!((results[0].fused_score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn document_filter_restricts_results() {
        let store = MemoryDocumentStore::new(1);
        let wanted = Uuid::new_v4();
        let other = Uuid::new_v4();
        store.insert(chunk(wanted, 0, "refund", vec![1.0])).unwrap();
        store.insert(chunk(other, 0, "refund", vec![1.0])).unwrap();

        let filters = SearchFilters {
            document_ids: Some(vec![wanted]),
            categories: Vec::new(),
        };
        let results = store.vector_search(&[1.0], 10, &filters).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, wanted);
    }
}
