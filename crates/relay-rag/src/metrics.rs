//! Pipeline metrics registry
//!
//! An explicit registry instance injected into the orchestrator and gateway.
//! Counters are plain atomics; `snapshot` gives a serializable view.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one pipeline instance
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    requests: AtomicU64,
    failures: AtomicU64,
    declines: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    provider_degradations: AtomicU64,
    provider_exhaustions: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decline(&self) {
        self.declines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_degraded(&self) {
        self.provider_degradations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_exhausted(&self) {
        self.provider_exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tokens(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion, Ordering::Relaxed);
    }

    /// Point-in-time view of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            declines: self.declines.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            provider_degradations: self.provider_degradations.load(Ordering::Relaxed),
            provider_exhaustions: self.provider_exhaustions.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics view
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub declines: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub provider_degradations: u64,
    pub provider_exhaustions: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}
