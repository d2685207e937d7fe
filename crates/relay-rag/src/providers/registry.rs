//! Backend registry: provider kind to constructor
//!
//! Kinds map to factories instead of match arms at call sites, so a host
//! application can register its own backend implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ProviderConfig, RagConfig};
use crate::error::{Error, Result};
use crate::metrics::MetricsRegistry;

use super::backend::ModelBackend;
use super::gateway::{GatewaySlot, ProviderGateway};
use super::ollama::OllamaBackend;
use super::openai::OpenAiBackend;

/// Kind of a provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local Ollama server
    Ollama,
    /// OpenAI-compatible HTTP endpoint
    OpenAi,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// Constructor for one backend kind
pub type BackendFactory = fn(&ProviderConfig) -> Result<Arc<dyn ModelBackend>>;

/// Registry of backend constructors
pub struct BackendRegistry {
    factories: HashMap<ProviderKind, BackendFactory>,
}

impl BackendRegistry {
    /// Registry with the built-in backends
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(ProviderKind::Ollama, |config| {
            Ok(Arc::new(OllamaBackend::new(config)?) as Arc<dyn ModelBackend>)
        });
        registry.register(ProviderKind::OpenAi, |config| {
            Ok(Arc::new(OpenAiBackend::new(config)?) as Arc<dyn ModelBackend>)
        });
        registry
    }

    /// Register (or replace) a factory for a kind
    pub fn register(&mut self, kind: ProviderKind, factory: BackendFactory) {
        self.factories.insert(kind, factory);
    }

    /// Build a backend for one provider entry
    pub fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn ModelBackend>> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| Error::Config(format!("no backend registered for '{}'", config.kind)))?;
        factory(config)
    }

    /// Build the full gateway from configuration, in priority order
    pub fn build_gateway(
        &self,
        config: &RagConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<ProviderGateway> {
        if config.providers.is_empty() {
            return Err(Error::Config("no providers configured".to_string()));
        }

        let mut slots = Vec::with_capacity(config.providers.len());
        for provider in &config.providers {
            let backend = self.build(provider)?;
            slots.push(GatewaySlot {
                name: provider.name.clone(),
                priority: provider.priority,
                timeout: Duration::from_secs(provider.timeout_secs),
                embed_model: provider.embed_model.clone(),
                chat_model: provider.chat_model.clone(),
                backend,
            });
        }

        Ok(ProviderGateway::new(
            slots,
            Duration::from_secs(config.provider_cooldown_secs),
            config.concurrency.embed_workers(),
            metrics,
        ))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
