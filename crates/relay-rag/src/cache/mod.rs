//! Content-addressed stage cache with TTL and single-flight
//!
//! Stores expensive stage outputs (analyzed queries, retrieval sets,
//! synthesized answers) keyed by fingerprint. Concurrent misses for the
//! same fingerprint collapse into a single upstream computation.

pub mod fingerprint;

pub use fingerprint::Fingerprint;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::CacheConfig;
use crate::error::{Error, Result};

/// One cached payload
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.ttl.is_zero() {
            return true;
        }
        let age = now.signed_duration_since(self.created_at);
        age.num_seconds() >= self.ttl.as_secs() as i64
    }
}

/// Outcome of a cached lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from the cache without recomputation
    Hit,
    /// Computed by this request (or shared from a concurrent computation)
    Miss,
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit)
    }
}

/// TTL-based stage cache with single-flight de-duplication
pub struct StageCache {
    entries: DashMap<String, CacheEntry>,
    inflight: DashMap<String, Arc<OnceCell<serde_json::Value>>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl StageCache {
    /// Create a cache from configuration
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(
            Duration::from_secs(config.expiration_hours * 3600),
            config.max_entries,
        )
    }

    /// Create a cache with an explicit TTL
    pub fn with_ttl(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            ttl,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a fingerprint without computing
    pub fn get<T: DeserializeOwned>(&self, fingerprint: &Fingerprint) -> Option<T> {
        let key = fingerprint.key();
        let now = Utc::now();

        if let Some(entry) = self.entries.get(&key) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(&key);
                return None;
            }
            return serde_json::from_value(entry.payload.clone()).ok();
        }
        None
    }

    /// Store a value under a fingerprint
    pub fn set<T: Serialize>(&self, fingerprint: &Fingerprint, value: &T) -> Result<()> {
        let payload =
            serde_json::to_value(value).map_err(|e| Error::Cache(format!("encode: {e}")))?;
        self.insert_entry(fingerprint.key(), payload);
        Ok(())
    }

    /// Fetch from cache, or compute once even under concurrent identical misses
    ///
    /// Concurrent callers with the same fingerprint share a single upstream
    /// computation; the winner writes the cache entry. A failed computation
    /// is not cached, so the next request retries.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        compute: F,
    ) -> Result<(T, CacheOutcome)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = fingerprint.key();

        if let Some(value) = self.get::<T>(fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(stage = fingerprint.stage(), fp = fingerprint.short(), "cache hit");
            return Ok((value, CacheOutcome::Hit));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let cell = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut computed_here = false;
        let result = cell
            .get_or_try_init(|| async {
                let value = compute().await?;
                computed_here = true;
                serde_json::to_value(&value).map_err(|e| Error::Cache(format!("encode: {e}")))
            })
            .await;

        match result {
            Ok(payload) => {
                let payload = payload.clone();
                if computed_here {
                    self.insert_entry(key.clone(), payload.clone());
                    self.inflight.remove(&key);
                }
                let value = serde_json::from_value(payload)
                    .map_err(|e| Error::Cache(format!("decode: {e}")))?;
                Ok((value, CacheOutcome::Miss))
            }
            Err(e) => {
                self.inflight.remove(&key);
                Err(e)
            }
        }
    }

    /// Drop a single entry
    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.entries.remove(&fingerprint.key());
    }

    /// Drop every entry belonging to a stage (corpus changed, answers stale)
    pub fn invalidate_stage(&self, stage: &str) -> usize {
        let prefix = format!("{stage}:");
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.key().clone())
            .collect();
        let count = keys.len();
        for key in keys {
            self.entries.remove(&key);
        }
        if count > 0 {
            tracing::info!("Invalidated {count} cached entries for stage '{stage}'");
        }
        count
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            max_entries: self.max_entries,
            ttl_seconds: self.ttl.as_secs(),
        }
    }

    fn insert_entry(&self, key: String, payload: serde_json::Value) {
        if self.entries.len() >= self.max_entries {
            // Evict the oldest entry
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().created_at)
                .map(|e| e.key().clone());
            if let Some(oldest_key) = oldest {
                self.entries.remove(&oldest_key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                payload,
                created_at: Utc::now(),
                ttl: self.ttl,
            },
        );
    }
}

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub max_entries: usize,
    pub ttl_seconds: u64,
}
