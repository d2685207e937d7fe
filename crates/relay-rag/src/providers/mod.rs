//! Provider abstractions: model backends, registry, and fallback gateway

pub mod backend;
pub mod gateway;
pub mod ollama;
pub mod openai;
pub mod registry;

pub use backend::{ChatMessage, ChatRole, Completion, ModelBackend};
pub use gateway::{GatewaySlot, HealthState, ProviderDescriptor, ProviderGateway};
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use registry::{BackendFactory, BackendRegistry, ProviderKind};
