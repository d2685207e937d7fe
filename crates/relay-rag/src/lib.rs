//! relay-rag: multi-stage RAG pipeline with cited answers
//!
//! Turns a user query into a grounded, cited answer: query analysis
//! (expansion, rewriting, HyDE), hybrid vector + keyword retrieval with
//! score fusion, Maximal Marginal Relevance reranking, and token-budgeted
//! synthesis, all behind a multi-provider language-model gateway with
//! ordered fallback and a single-flight stage cache.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod providers;
pub mod rerank;
pub mod retrieval;
pub mod synthesis;
pub mod types;

pub use cache::{Fingerprint, StageCache};
pub use config::RagConfig;
pub use error::{Error, Result};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use pipeline::{Orchestrator, PipelineStage};
pub use providers::{BackendRegistry, ModelBackend, ProviderGateway, ProviderKind};
pub use retrieval::{DocumentStore, MemoryDocumentStore, SearchFilters};
pub use types::{Answer, Candidate, Citation, PipelineStatus, Query, RankedResult};
