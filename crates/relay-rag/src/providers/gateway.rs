//! Provider gateway: ordered fallback over model backends
//!
//! Backends are tried in priority order. A backend that times out or errors
//! is marked degraded and skipped for a cool-down window; the call moves on
//! to the next backend. `ProviderExhausted` is returned only when every
//! configured backend has failed for the same call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::metrics::MetricsRegistry;

use super::backend::{ChatMessage, Completion, ModelBackend};
use super::registry::ProviderKind;

/// Health of one backend as seen by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// Failed recently; skipped until the cool-down expires
    Degraded,
    /// Failed and still inside the cool-down window at snapshot time
    Unavailable,
}

/// One backend with its routing metadata
pub struct GatewaySlot {
    pub name: String,
    pub priority: u32,
    pub timeout: Duration,
    pub embed_model: String,
    pub chat_model: String,
    pub backend: Arc<dyn ModelBackend>,
}

/// Descriptor of one configured provider, for introspection
#[derive(Debug, Clone, Serialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    pub embed_model: String,
    pub chat_model: String,
    pub priority: u32,
    pub health: HealthState,
}

/// Gateway over one or more model backends with ordered fallback
pub struct ProviderGateway {
    slots: Vec<GatewaySlot>,
    cooldown: Duration,
    /// Backend name -> end of its cool-down window
    degraded_until: RwLock<HashMap<String, Instant>>,
    embed_pool: Arc<Semaphore>,
    metrics: Arc<MetricsRegistry>,
}

impl ProviderGateway {
    /// Create a gateway; slots are sorted by ascending priority
    pub fn new(
        mut slots: Vec<GatewaySlot>,
        cooldown: Duration,
        embed_workers: usize,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        slots.sort_by_key(|s| s.priority);
        Self {
            slots,
            cooldown,
            degraded_until: RwLock::new(HashMap::new()),
            embed_pool: Arc::new(Semaphore::new(embed_workers.max(1))),
            metrics,
        }
    }

    /// Generate an embedding, falling back across backends
    ///
    /// Returns the vector and the name of the backend that produced it.
    pub async fn embed(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<f32>, String)> {
        let _permit = self
            .embed_pool
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;
        self.try_each("embed", cancel, |backend| {
            let text = text.to_string();
            async move { backend.embed(&text).await }
        })
        .await
    }

    /// Embed several texts with bounded concurrency
    ///
    /// Each text goes through the normal fallback path; the semaphore keeps
    /// the number of in-flight provider calls at the configured worker count.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        let futures: Vec<_> = texts.iter().map(|text| self.embed(text, cancel)).collect();
        let results = futures::future::join_all(futures).await;

        let mut embeddings = Vec::with_capacity(results.len());
        for result in results {
            embeddings.push(result?.0);
        }
        Ok(embeddings)
    }

    /// Generate a chat completion, falling back across backends
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
        cancel: &CancellationToken,
    ) -> Result<(Completion, String)> {
        let result = self
            .try_each("complete", cancel, |backend| {
                let messages = messages.to_vec();
                async move { backend.complete(&messages, max_tokens).await }
            })
            .await;

        if let Ok((completion, _)) = &result {
            self.metrics.record_tokens(
                completion.usage.prompt_tokens,
                completion.usage.completion_tokens,
            );
        }
        result
    }

    /// Probe every backend, in priority order
    ///
    /// Unlike [`health_snapshot`](Self::health_snapshot), this issues a live
    /// check against each backend; a reachable backend clears its cool-down.
    pub async fn probe(&self) -> Vec<(String, bool)> {
        let mut results = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let reachable = matches!(
                tokio::time::timeout(slot.timeout, slot.backend.health_check()).await,
                Ok(Ok(true))
            );
            if reachable {
                self.mark_healthy(&slot.name);
            }
            results.push((slot.name.clone(), reachable));
        }
        results
    }

    /// Current health of every configured backend, in priority order
    pub fn health_snapshot(&self) -> Vec<ProviderDescriptor> {
        let now = Instant::now();
        let degraded = self.degraded_until.read();
        self.slots
            .iter()
            .map(|slot| {
                let health = match degraded.get(&slot.name) {
                    Some(until) if *until > now => HealthState::Unavailable,
                    Some(_) => HealthState::Degraded,
                    None => HealthState::Healthy,
                };
                ProviderDescriptor {
                    name: slot.name.clone(),
                    kind: slot.backend.kind(),
                    embed_model: slot.embed_model.clone(),
                    chat_model: slot.chat_model.clone(),
                    priority: slot.priority,
                    health,
                }
            })
            .collect()
    }

    /// Try each backend in priority order until one succeeds
    ///
    /// The health map is read before the call and written after it; no lock
    /// is held across the provider await.
    async fn try_each<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<(T, String)>
    where
        F: FnMut(Arc<dyn ModelBackend>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        for slot in &self.slots {
            if self.in_cooldown(&slot.name) {
                tracing::debug!(
                    provider = slot.name.as_str(),
                    "skipping degraded provider for {operation}"
                );
                continue;
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = tokio::time::timeout(slot.timeout, call(Arc::clone(&slot.backend))) => outcome,
            };

            match outcome {
                Ok(Ok(value)) => {
                    self.mark_healthy(&slot.name);
                    return Ok((value, slot.name.clone()));
                }
                Ok(Err(Error::Cancelled)) => return Err(Error::Cancelled),
                Ok(Err(e)) => {
                    tracing::warn!(
                        provider = slot.name.as_str(),
                        "provider failed during {operation}: {e}"
                    );
                    self.mark_degraded(&slot.name);
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        provider = slot.name.as_str(),
                        "provider timed out during {operation} after {:?}",
                        slot.timeout
                    );
                    self.mark_degraded(&slot.name);
                }
            }
        }

        self.metrics.record_provider_exhausted();
        Err(Error::exhausted(operation))
    }

    fn in_cooldown(&self, name: &str) -> bool {
        let degraded = self.degraded_until.read();
        degraded
            .get(name)
            .is_some_and(|until| *until > Instant::now())
    }

    fn mark_degraded(&self, name: &str) {
        self.metrics.record_provider_degraded();
        let mut degraded = self.degraded_until.write();
        degraded.insert(name.to_string(), Instant::now() + self.cooldown);
    }

    fn mark_healthy(&self, name: &str) {
        let mut degraded = self.degraded_until.write();
        degraded.remove(name);
    }
}
