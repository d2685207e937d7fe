//! Configuration for the RAG pipeline

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    /// Query analysis configuration
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Reranking configuration
    #[serde(default)]
    pub rerank: RerankConfig,
    /// Synthesis configuration
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    /// Stage cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Ordered provider backends (priority order)
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Cool-down window for a degraded provider in seconds
    #[serde(default = "default_cooldown_secs")]
    pub provider_cooldown_secs: u64,
    /// Concurrency and deadline configuration
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        fn unit_range(name: &str, value: f32) -> Result<()> {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
            Ok(())
        }

        unit_range("rerank.mmr_lambda", self.rerank.mmr_lambda)?;
        unit_range("rerank.recency_weight", self.rerank.recency_weight)?;
        unit_range("retrieval.min_similarity", self.retrieval.min_similarity)?;
        unit_range("retrieval.vector_weight", self.retrieval.vector_weight)?;
        unit_range(
            "synthesis.confidence_threshold",
            self.synthesis.confidence_threshold,
        )?;

        if self.retrieval.candidate_multiplier == 0 {
            return Err(Error::Config(
                "retrieval.candidate_multiplier must be >= 1".to_string(),
            ));
        }
        if self.retrieval.default_top_k == 0 {
            return Err(Error::Config(
                "retrieval.default_top_k must be >= 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(Error::Config("provider name must not be empty".to_string()));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
        }

        Ok(())
    }
}

/// Query analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Maximum number of expansion terms
    #[serde(default = "default_max_expansion_terms")]
    pub max_expansion_terms: usize,
    /// Include synonym lookups in expansion
    #[serde(default = "default_true")]
    pub include_synonyms: bool,
    /// Generate a hypothetical answer passage and embed it as a second seed
    #[serde(default)]
    pub enable_hyde: bool,
    /// Ask the chat model for a clarified restatement of the query
    #[serde(default)]
    pub enable_query_rewriting: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_expansion_terms: 8,
            include_synonyms: true,
            enable_hyde: false,
            enable_query_rewriting: false,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of candidates returned after rerank
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    /// Retrieval breadth: the store is asked for top_k * multiplier candidates
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Drop candidates with fused score below this
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Issue a keyword search alongside the vector search
    #[serde(default = "default_true")]
    pub enable_hybrid_search: bool,
    /// Return keyword-only results when vector search fails entirely
    #[serde(default = "default_true")]
    pub fallback_to_keyword: bool,
    /// Retrieve at chunk granularity (whole documents otherwise)
    #[serde(default = "default_true")]
    pub use_chunk_retrieval: bool,
    /// Fusion weight for the vector score: fused = w*vector + (1-w)*keyword
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            candidate_multiplier: 3,
            min_similarity: 0.25,
            enable_hybrid_search: true,
            fallback_to_keyword: true,
            use_chunk_retrieval: true,
            vector_weight: 0.7,
        }
    }
}

/// Reranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Relevance/diversity trade-off: 1.0 = pure relevance, 0.0 = pure diversity
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    /// Apply the MMR diversity term at all
    #[serde(default = "default_true")]
    pub consider_diversity: bool,
    /// Blend recency into relevance before the MMR loop
    #[serde(default)]
    pub enable_temporal_weighting: bool,
    /// Additive weight of the normalized recency score
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,
    /// Half-life of the recency decay in days
    #[serde(default = "default_recency_half_life")]
    pub recency_half_life_days: f32,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            mmr_lambda: 0.7,
            consider_diversity: true,
            enable_temporal_weighting: false,
            recency_weight: 0.15,
            recency_half_life_days: 30.0,
        }
    }
}

/// Synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Token budget for the assembled context
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    /// Instruct the model to mark citations per included candidate
    #[serde(default = "default_true")]
    pub include_citations: bool,
    /// Re-invoke synthesis while confidence is below this
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Pass candidate text through the compression collaborator first
    #[serde(default)]
    pub enable_contextual_compression: bool,
    /// Extra synthesis attempts when confidence is low
    #[serde(default = "default_max_refinement_iterations")]
    pub max_refinement_iterations: usize,
    /// Post-hoc verification of unsupported claims
    #[serde(default)]
    pub enable_fact_checking: bool,
    /// Upper bound on completion tokens per synthesis call
    #[serde(default = "default_max_answer_tokens")]
    pub max_answer_tokens: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_context_length: 2048,
            include_citations: true,
            confidence_threshold: 0.5,
            enable_contextual_compression: false,
            max_refinement_iterations: 1,
            enable_fact_checking: false,
            max_answer_tokens: 1024,
        }
    }
}

/// Stage cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Per-entry TTL in hours
    #[serde(default = "default_cache_expiration_hours")]
    pub expiration_hours: u64,
    /// Maximum number of cached entries before oldest-entry eviction
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiration_hours: 24,
            max_entries: 1024,
        }
    }
}

/// One provider backend entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider kind (selects the backend implementation)
    pub kind: crate::providers::ProviderKind,
    /// Unique name for logging and health tracking
    pub name: String,
    /// Base URL of the backend
    pub base_url: String,
    /// Environment variable holding the API key (remote backends)
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Embedding model identifier
    pub embed_model: String,
    /// Chat completion model identifier
    pub chat_model: String,
    /// Priority order (lower tried first)
    #[serde(default)]
    pub priority: u32,
    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

/// Concurrency and deadline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Parallel embedding calls (default: CPU count, max 4)
    pub embed_workers: Option<usize>,
    /// Independent timeout for each search modality in seconds
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
    /// Overall request deadline in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Return the last completed stage's partial output on cancellation
    #[serde(default = "default_true")]
    pub partial_on_cancel: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            embed_workers: None,
            search_timeout_secs: 10,
            request_timeout_secs: 120,
            partial_on_cancel: true,
        }
    }
}

impl ConcurrencyConfig {
    /// Effective embedding worker count
    pub fn embed_workers(&self) -> usize {
        self.embed_workers
            .unwrap_or_else(|| num_cpus::get().min(4))
            .max(1)
    }
}

fn default_true() -> bool {
    true
}
fn default_max_expansion_terms() -> usize {
    8
}
fn default_top_k() -> usize {
    10
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_min_similarity() -> f32 {
    0.25
}
fn default_vector_weight() -> f32 {
    0.7
}
fn default_mmr_lambda() -> f32 {
    0.7
}
fn default_recency_weight() -> f32 {
    0.15
}
fn default_recency_half_life() -> f32 {
    30.0
}
fn default_max_context_length() -> usize {
    2048
}
fn default_confidence_threshold() -> f32 {
    0.5
}
fn default_max_refinement_iterations() -> usize {
    1
}
fn default_max_answer_tokens() -> usize {
    1024
}
fn default_cache_expiration_hours() -> u64 {
    24
}
fn default_cache_max_entries() -> usize {
    1024
}
fn default_cooldown_secs() -> u64 {
    30
}
fn default_provider_timeout_secs() -> u64 {
    60
}
fn default_search_timeout_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        RagConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_lambda() {
        let mut config = RagConfig::default();
        config.rerank.mmr_lambda = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_multiplier() {
        let mut config = RagConfig::default();
        config.retrieval.candidate_multiplier = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml_with_providers() {
        let raw = r#"
            [retrieval]
            default_top_k = 5
            min_similarity = 0.3

            [[providers]]
            kind = "ollama"
            name = "local"
            base_url = "http://localhost:11434"
            embed_model = "nomic-embed-text"
            chat_model = "phi3"
            priority = 0

            [[providers]]
            kind = "openai"
            name = "cloud"
            base_url = "https://api.openai.com/v1"
            api_key_env = "OPENAI_API_KEY"
            embed_model = "text-embedding-3-small"
            chat_model = "gpt-4o-mini"
            priority = 1
        "#;

        let config = RagConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.retrieval.default_top_k, 5);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].name, "local");
    }

    #[test]
    fn rejects_duplicate_provider_names() {
        let raw = r#"
            [[providers]]
            kind = "ollama"
            name = "same"
            base_url = "http://localhost:11434"
            embed_model = "a"
            chat_model = "b"

            [[providers]]
            kind = "ollama"
            name = "same"
            base_url = "http://localhost:11435"
            embed_model = "a"
            chat_model = "b"
        "#;
        assert!(RagConfig::from_toml_str(raw).is_err());
    }
}
