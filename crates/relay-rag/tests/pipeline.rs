//! End-to-end pipeline tests with scripted backends and the in-memory store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use relay_rag::config::{ConcurrencyConfig, RagConfig};
use relay_rag::error::{Error, Result};
use relay_rag::metrics::MetricsRegistry;
use relay_rag::pipeline::{Orchestrator, PipelineStage};
use relay_rag::providers::{
    ChatMessage, Completion, GatewaySlot, HealthState, ModelBackend, ProviderGateway, ProviderKind,
};
use relay_rag::retrieval::memory::StoredChunk;
use relay_rag::retrieval::{DocumentStore, MemoryDocumentStore, SearchFilters};
use relay_rag::types::{Candidate, PipelineStatus, Query, TokenUsage};

const DIMS: usize = 2;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scripted backend with call counters
struct MockBackend {
    name: String,
    embed_vec: Vec<f32>,
    answer: String,
    verify_reply: String,
    fail_embed: bool,
    fail_complete: bool,
    empty_rewrite: bool,
    delay: Duration,
    embed_calls: Arc<AtomicUsize>,
    chat_calls: Arc<AtomicUsize>,
}

impl MockBackend {
    fn healthy(name: &str) -> Self {
        Self {
            name: name.to_string(),
            embed_vec: vec![1.0, 0.0],
            answer: "Refunds are processed within 30 days [1].".to_string(),
            verify_reply: "[]".to_string(),
            fail_embed: false,
            fail_complete: false,
            empty_rewrite: false,
            delay: Duration::ZERO,
            embed_calls: Arc::new(AtomicUsize::new(0)),
            chat_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing(name: &str) -> Self {
        let mut backend = Self::healthy(name);
        backend.fail_embed = true;
        backend.fail_complete = true;
        backend
    }

    fn slow(name: &str, delay: Duration) -> Self {
        let mut backend = Self::healthy(name);
        backend.delay = delay;
        backend
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_embed {
            return Err(Error::provider(&self.name, "embed", "scripted failure"));
        }
        Ok(self.embed_vec.clone())
    }

    async fn complete(&self, messages: &[ChatMessage], _max_tokens: usize) -> Result<Completion> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_complete {
            return Err(Error::provider(&self.name, "complete", "scripted failure"));
        }

        let system = &messages[0].content;
        let text = if system.contains("Restate") {
            if self.empty_rewrite {
                String::new()
            } else {
                "restated refund query".to_string()
            }
        } else if system.contains("plausibly appear") {
            "A hypothetical refund passage.".to_string()
        } else if system.contains("Condense") {
            "Condensed refund terms.".to_string()
        } else if system.contains("does not support") {
            self.verify_reply.clone()
        } else {
            self.answer.clone()
        };

        Ok(Completion {
            text,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.fail_embed)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn slot(backend: Arc<MockBackend>, priority: u32, timeout: Duration) -> GatewaySlot {
    GatewaySlot {
        name: backend.name.clone(),
        priority,
        timeout,
        embed_model: "mock-embed".to_string(),
        chat_model: "mock-chat".to_string(),
        backend,
    }
}

fn gateway(backends: Vec<Arc<MockBackend>>, metrics: Arc<MetricsRegistry>) -> Arc<ProviderGateway> {
    let slots = backends
        .into_iter()
        .enumerate()
        .map(|(i, b)| slot(b, i as u32, Duration::from_secs(5)))
        .collect();
    Arc::new(ProviderGateway::new(
        slots,
        Duration::from_secs(30),
        2,
        metrics,
    ))
}

/// Store seeded with refund content aligned to the mock query embedding
fn seeded_store() -> Arc<MemoryDocumentStore> {
    let store = MemoryDocumentStore::new(DIMS);
    let doc = Uuid::new_v4();
    store
        .insert(StoredChunk {
            document_id: doc,
            chunk_index: 0,
            text: "Refunds are processed within 30 days of the request.".to_string(),
            embedding: vec![1.0, 0.0],
            categories: Vec::new(),
            modified_at: None,
        })
        .unwrap();
    store
        .insert(StoredChunk {
            document_id: doc,
            chunk_index: 1,
            text: "Refund requests require the original receipt.".to_string(),
            embedding: vec![0.9, 0.1],
            categories: Vec::new(),
            modified_at: None,
        })
        .unwrap();
    Arc::new(store)
}

fn test_config() -> RagConfig {
    let mut config = RagConfig::default();
    config.retrieval.default_top_k = 3;
    config.retrieval.min_similarity = 0.3;
    config.concurrency = ConcurrencyConfig {
        embed_workers: Some(2),
        search_timeout_secs: 5,
        request_timeout_secs: 10,
        partial_on_cancel: true,
    };
    config
}

fn orchestrator_with(
    config: RagConfig,
    backends: Vec<Arc<MockBackend>>,
    store: Arc<dyn DocumentStore>,
) -> (Orchestrator, Arc<MetricsRegistry>) {
    let metrics = Arc::new(MetricsRegistry::new());
    let gateway = gateway(backends, Arc::clone(&metrics));
    let orchestrator =
        Orchestrator::new(config, gateway, store, Arc::clone(&metrics)).unwrap();
    (orchestrator, metrics)
}

#[tokio::test]
async fn end_to_end_produces_cited_answer() {
    init_tracing();
    let backend = Arc::new(MockBackend::healthy("primary"));
    let (orchestrator, _) =
        orchestrator_with(test_config(), vec![Arc::clone(&backend)], seeded_store());

    let answer = orchestrator
        .run(Query::new("what is the refund policy?"))
        .await
        .unwrap();

    assert_eq!(answer.status, PipelineStatus::Done);
    assert!(answer.text.contains("30 days"));
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].rank, 0);
    assert!(answer.confidence > 0.0);
    assert_eq!(answer.provider.as_deref(), Some("primary"));
    assert!(answer.usage.total() > 0);
}

#[tokio::test]
async fn below_threshold_declines_without_synthesis_call() {
    let backend = Arc::new(MockBackend::healthy("primary"));
    // Orthogonal query embedding: every similarity lands at 0.5
    let mut config = test_config();
    config.retrieval.min_similarity = 0.7;
    config.retrieval.enable_hybrid_search = false;

    let store = MemoryDocumentStore::new(DIMS);
    let doc = Uuid::new_v4();
    store
        .insert(StoredChunk {
            document_id: doc,
            chunk_index: 0,
            text: "Unrelated content.".to_string(),
            embedding: vec![0.0, 1.0],
            categories: Vec::new(),
            modified_at: None,
        })
        .unwrap();

    let (orchestrator, metrics) =
        orchestrator_with(config, vec![Arc::clone(&backend)], Arc::new(store));
    let answer = orchestrator.run(Query::new("refund policy")).await.unwrap();

    assert_eq!(answer.status, PipelineStatus::Declined);
    assert_eq!(answer.confidence, 0.0);
    assert!(answer.citations.is_empty());
    assert_eq!(
        backend.chat_calls.load(Ordering::SeqCst),
        0,
        "decline must not invoke the chat model"
    );
    assert_eq!(metrics.snapshot().declines, 1);
}

#[tokio::test]
async fn primary_timeout_falls_back_without_exhaustion() {
    let primary = Arc::new(MockBackend::slow("primary", Duration::from_millis(500)));
    let fallback = Arc::new(MockBackend::healthy("fallback"));
    let metrics = Arc::new(MetricsRegistry::new());
    let slots = vec![
        slot(Arc::clone(&primary), 0, Duration::from_millis(50)),
        slot(Arc::clone(&fallback), 1, Duration::from_secs(5)),
    ];
    let gateway = Arc::new(ProviderGateway::new(
        slots,
        Duration::from_secs(30),
        2,
        Arc::clone(&metrics),
    ));
    let orchestrator = Orchestrator::new(
        test_config(),
        gateway,
        seeded_store(),
        Arc::clone(&metrics),
    )
    .unwrap();

    let answer = orchestrator.run(Query::new("refund policy?")).await.unwrap();

    assert_eq!(answer.status, PipelineStatus::Done);
    assert_eq!(answer.provider.as_deref(), Some("fallback"));

    let snap = metrics.snapshot();
    assert!(snap.provider_degradations >= 1);
    assert_eq!(snap.provider_exhaustions, 0);
}

#[tokio::test]
async fn degraded_primary_is_skipped_in_health_snapshot() {
    let primary = Arc::new(MockBackend::failing("primary"));
    let fallback = Arc::new(MockBackend::healthy("fallback"));
    let metrics = Arc::new(MetricsRegistry::new());
    let gateway = gateway(
        vec![Arc::clone(&primary), Arc::clone(&fallback)],
        Arc::clone(&metrics),
    );

    let cancel = CancellationToken::new();
    let (_, provider) = gateway.embed("refund", &cancel).await.unwrap();
    assert_eq!(provider, "fallback");

    let snapshot = gateway.health_snapshot();
    assert_eq!(snapshot[0].name, "primary");
    assert_eq!(snapshot[0].health, HealthState::Unavailable);
    assert_eq!(snapshot[1].health, HealthState::Healthy);

    // Cooled-down primary is skipped without another attempt
    let calls_before = primary.embed_calls.load(Ordering::SeqCst);
    gateway.embed("refund", &cancel).await.unwrap();
    assert_eq!(primary.embed_calls.load(Ordering::SeqCst), calls_before);

    // A live probe reports the broken backend and clears reachable ones
    let probe = gateway.probe().await;
    assert_eq!(probe[0], ("primary".to_string(), false));
    assert_eq!(probe[1], ("fallback".to_string(), true));
}

#[tokio::test]
async fn exhausted_providers_fail_gracefully() {
    let backend = Arc::new(MockBackend::failing("only"));
    let (orchestrator, metrics) =
        orchestrator_with(test_config(), vec![backend], seeded_store());

    let answer = orchestrator.run(Query::new("refund policy?")).await.unwrap();

    match &answer.status {
        PipelineStatus::Failed { stage, reason } => {
            assert_eq!(*stage, PipelineStage::Analyzing);
            assert!(reason.contains("exhausted"), "unexpected reason: {reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!answer.text.is_empty());
    assert!(metrics.snapshot().provider_exhaustions >= 1);
}

#[tokio::test]
async fn concurrent_identical_requests_compute_once() {
    let backend = Arc::new(MockBackend::slow("primary", Duration::from_millis(30)));
    let (orchestrator, _) = orchestrator_with(
        test_config(),
        vec![Arc::clone(&backend)],
        seeded_store(),
    );
    let orchestrator = Arc::new(orchestrator);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator
                .run(Query::new("what is the refund policy?"))
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        let answer = handle.await.unwrap();
        assert_eq!(answer.status, PipelineStatus::Done);
        assert!(answer.text.contains("30 days"));
    }

    assert_eq!(
        backend.embed_calls.load(Ordering::SeqCst),
        1,
        "analysis must collapse into one embedding call"
    );
    assert_eq!(
        backend.chat_calls.load(Ordering::SeqCst),
        1,
        "synthesis must collapse into one completion call"
    );
}

#[tokio::test]
async fn second_run_is_served_from_cache() {
    let backend = Arc::new(MockBackend::healthy("primary"));
    let (orchestrator, metrics) = orchestrator_with(
        test_config(),
        vec![Arc::clone(&backend)],
        seeded_store(),
    );

    let first = orchestrator
        .run(Query::new("refund policy?"))
        .await
        .unwrap();
    assert!(!first.cache.analysis_hit);
    assert!(!first.cache.synthesis_hit);

    let second = orchestrator
        .run(Query::new("refund policy?"))
        .await
        .unwrap();
    assert!(second.cache.analysis_hit);
    assert!(second.cache.retrieval_hit);
    assert!(second.cache.synthesis_hit);
    assert_eq!(second.text, first.text);

    assert_eq!(backend.chat_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.embed_calls.load(Ordering::SeqCst), 1);
    assert!(metrics.snapshot().cache_hits >= 3);
}

#[tokio::test]
async fn cache_invalidation_forces_recomputation() {
    let backend = Arc::new(MockBackend::healthy("primary"));
    let (orchestrator, _) = orchestrator_with(
        test_config(),
        vec![Arc::clone(&backend)],
        seeded_store(),
    );

    orchestrator.run(Query::new("refund policy?")).await.unwrap();
    orchestrator.cache().invalidate_stage("synthesize");
    let answer = orchestrator.run(Query::new("refund policy?")).await.unwrap();

    assert!(!answer.cache.synthesis_hit);
    assert_eq!(backend.chat_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancellation_without_partial_policy_errors() {
    let backend = Arc::new(MockBackend::healthy("primary"));
    let mut config = test_config();
    config.concurrency.partial_on_cancel = false;
    let (orchestrator, _) = orchestrator_with(config, vec![backend], seeded_store());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = orchestrator
        .run_with_cancel(Query::new("refund policy?"), cancel)
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn cancellation_with_partial_policy_returns_failed_answer() {
    let backend = Arc::new(MockBackend::healthy("primary"));
    let (orchestrator, _) = orchestrator_with(test_config(), vec![backend], seeded_store());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let answer = orchestrator
        .run_with_cancel(Query::new("refund policy?"), cancel)
        .await
        .unwrap();
    assert!(answer.status.is_failed());
}

/// Store whose vector search always fails
struct BrokenVectorStore {
    inner: Arc<MemoryDocumentStore>,
}

#[async_trait]
impl DocumentStore for BrokenVectorStore {
    async fn vector_search(
        &self,
        _embedding: &[f32],
        _top_k: usize,
        _filters: &SearchFilters,
    ) -> Result<Vec<Candidate>> {
        Err(Error::store("vector index offline"))
    }

    async fn keyword_search(
        &self,
        text: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Candidate>> {
        self.inner.keyword_search(text, top_k, filters).await
    }
}

#[tokio::test]
async fn keyword_fallback_covers_vector_outage() {
    let backend = Arc::new(MockBackend::healthy("primary"));
    let store = Arc::new(BrokenVectorStore {
        inner: seeded_store(),
    });
    // Term-overlap keyword scores run low; the threshold must admit them
    let mut config = test_config();
    config.retrieval.min_similarity = 0.05;
    let (orchestrator, _) = orchestrator_with(config, vec![backend], store);

    let answer = orchestrator
        .run(Query::new("refund policy requirements"))
        .await
        .unwrap();
    assert_eq!(answer.status, PipelineStatus::Done);
    assert!(!answer.citations.is_empty());
}

#[tokio::test]
async fn vector_outage_without_fallback_fails_retrieval() {
    let backend = Arc::new(MockBackend::healthy("primary"));
    let store = Arc::new(BrokenVectorStore {
        inner: seeded_store(),
    });
    let mut config = test_config();
    config.retrieval.fallback_to_keyword = false;
    config.retrieval.enable_hybrid_search = false;
    let (orchestrator, _) = orchestrator_with(config, vec![backend], store);

    let answer = orchestrator.run(Query::new("refund policy?")).await.unwrap();
    match &answer.status {
        PipelineStatus::Failed { stage, .. } => assert_eq!(*stage, PipelineStage::Retrieving),
        other => panic!("expected retrieval failure, got {other:?}"),
    }
}

#[tokio::test]
async fn dimension_mismatch_names_both_widths() {
    let mut backend = MockBackend::healthy("primary");
    backend.embed_vec = vec![1.0, 0.0, 0.0]; // store expects 2
    let backend = Arc::new(backend);
    let mut config = test_config();
    config.retrieval.enable_hybrid_search = false;
    config.retrieval.fallback_to_keyword = false;
    let (orchestrator, _) = orchestrator_with(config, vec![backend], seeded_store());

    let answer = orchestrator.run(Query::new("refund policy?")).await.unwrap();
    match &answer.status {
        PipelineStatus::Failed { reason, .. } => {
            assert!(reason.contains("expected 2"), "reason: {reason}");
            assert!(reason.contains("3"), "reason: {reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn hyde_adds_one_completion_and_one_embedding() {
    let backend = Arc::new(MockBackend::healthy("primary"));
    let mut config = test_config();
    config.analysis.enable_hyde = true;
    let (orchestrator, _) = orchestrator_with(
        config,
        vec![Arc::clone(&backend)],
        seeded_store(),
    );

    let answer = orchestrator.run(Query::new("refund policy?")).await.unwrap();
    assert_eq!(answer.status, PipelineStatus::Done);
    // query embed + hyde embed; hyde passage + synthesis completions
    assert_eq!(backend.embed_calls.load(Ordering::SeqCst), 2);
    assert_eq!(backend.chat_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unusable_rewrite_falls_back_to_original_text() {
    let mut backend = MockBackend::healthy("primary");
    backend.empty_rewrite = true;
    let backend = Arc::new(backend);
    let mut config = test_config();
    config.analysis.enable_query_rewriting = true;
    let (orchestrator, _) = orchestrator_with(
        config,
        vec![Arc::clone(&backend)],
        seeded_store(),
    );

    let answer = orchestrator.run(Query::new("refund policy?")).await.unwrap();
    assert_eq!(answer.status, PipelineStatus::Done);
    // Rewrite attempt plus synthesis; the empty rewrite was discarded
    assert_eq!(backend.chat_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn fact_check_claims_land_on_the_answer() {
    let mut backend = MockBackend::healthy("primary");
    backend.verify_reply = "[\"refund window is 60 days\"]".to_string();
    let backend = Arc::new(backend);
    let mut config = test_config();
    config.synthesis.enable_fact_checking = true;
    let (orchestrator, _) = orchestrator_with(config, vec![backend], seeded_store());

    let answer = orchestrator.run(Query::new("refund policy?")).await.unwrap();
    assert_eq!(answer.status, PipelineStatus::Done);
    assert_eq!(answer.unsupported_claims, vec!["refund window is 60 days"]);
}

#[tokio::test]
async fn embed_batch_embeds_every_text() {
    let backend = Arc::new(MockBackend::healthy("primary"));
    let metrics = Arc::new(MetricsRegistry::new());
    let gateway = gateway(vec![Arc::clone(&backend)], metrics);

    let texts: Vec<String> = (0..6).map(|i| format!("term {i}")).collect();
    let cancel = CancellationToken::new();
    let embeddings = gateway.embed_batch(&texts, &cancel).await.unwrap();

    assert_eq!(embeddings.len(), 6);
    assert!(embeddings.iter().all(|e| e.len() == DIMS));
    assert_eq!(backend.embed_calls.load(Ordering::SeqCst), 6);
}
