//! Query request types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user query, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Raw query text
    pub text: String,

    /// Restrict retrieval to these document IDs (optional)
    #[serde(default)]
    pub document_filter: Option<Vec<Uuid>>,

    /// Restrict retrieval to these category tags (optional)
    #[serde(default)]
    pub categories: Vec<String>,

    /// Prior conversation turns as (question, answer) pairs (optional)
    #[serde(default)]
    pub history: Vec<(String, String)>,
}

impl Query {
    /// Create a new query
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            document_filter: None,
            categories: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Restrict retrieval to the given document IDs
    pub fn with_documents(mut self, doc_ids: Vec<Uuid>) -> Self {
        self.document_filter = Some(doc_ids);
        self
    }

    /// Restrict retrieval to the given categories
    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    /// Attach conversation history
    pub fn with_history(mut self, history: Vec<(String, String)>) -> Self {
        self.history = history;
        self
    }
}

/// One retrieval seed: an embedding and where it came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySeed {
    /// Seed label ("query" or "hyde")
    pub label: String,
    /// Embedding vector
    pub embedding: Vec<f32>,
}

/// The query after analysis, ready for retrieval
///
/// Derived from a [`Query`]; discarded after retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedQuery {
    /// The original query
    pub query: Query,
    /// Ordered expansion terms, capped at the configured maximum
    pub expansion_terms: Vec<String>,
    /// Clarified restatement of the query, if rewriting succeeded
    pub rewritten: Option<String>,
    /// Retrieval seeds: the query embedding plus an optional HyDE embedding
    pub seeds: Vec<QuerySeed>,
}

impl AnalyzedQuery {
    /// Text to use for keyword search: the rewritten form when present
    pub fn search_text(&self) -> &str {
        self.rewritten.as_deref().unwrap_or(&self.query.text)
    }
}
