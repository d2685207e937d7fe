//! Error types for the pipeline

use thiserror::Error;

use crate::pipeline::PipelineStage;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
///
/// Recoverable conditions (a single degraded provider, an empty retrieval
/// set, unparsable citation markup) are absorbed inside their stage and
/// never cross the orchestrator boundary as errors. The variants here are
/// the ones that do.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single provider call failed (degraded, fallback continues)
    #[error("Provider '{provider}' failed during {operation}: {message}")]
    Provider {
        provider: String,
        operation: String,
        message: String,
    },

    /// Every configured provider failed for the same call
    #[error("All providers exhausted for {operation}")]
    ProviderExhausted { operation: String },

    /// Embedding width incompatible with stored vectors
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Document store failure
    #[error("Document store error: {0}")]
    Store(String),

    /// Cache payload could not be encoded or decoded
    #[error("Cache error: {0}")]
    Cache(String),

    /// Deadline exceeded at a stage
    #[error("Timeout during {0}")]
    Timeout(PipelineStage),

    /// Request was cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a provider call error
    pub fn provider(
        provider: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a provider-exhausted error
    pub fn exhausted(operation: impl Into<String>) -> Self {
        Self::ProviderExhausted {
            operation: operation.into(),
        }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
