// Parley Core Library
// Provider orchestration and tool-calling engine

pub mod catalog;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod manager;
pub mod message;
pub mod persona;
pub mod providers;
pub mod retry;
pub mod tools;

// Export core types
pub use catalog::{ModelCatalog, ModelSpec, TokenLimits};
pub use config::{EngineConfig, ProviderSettings, RetrySettings};
pub use conversation::{ChatSession, ConversationStore, InMemoryConversationStore};
pub use dispatch::{DispatchState, DispatchStats, ToolDispatchLoop};
pub use manager::{GenerateOptions, ProviderManager, ProviderState, Response};
pub use message::{FunctionCallRequest, Message, Role};
pub use persona::{Persona, PluginCatalog};
pub use providers::{
    AdapterFactory, GenerateRequest, HttpAdapterFactory, ModelOutput, ProviderAdapter, ProviderId,
    TokenStream,
};
pub use retry::RetryPolicy;
pub use tools::native::CurrentTimeTool;
pub use tools::{FnTool, FunctionDescriptor, Tool, ToolError, ToolParam, ToolRegistry, ToolResult};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No provider initialized")]
    NotInitialized,

    #[error("No models configured for provider {0}")]
    NoModelsConfigured(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Tool loop limit reached after {0} iterations")]
    ToolLoopLimit(usize),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl ParleyError {
    /// Only rate limits and transient transport failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ParleyError::RateLimited(_) | ParleyError::Timeout(_) | ParleyError::Transient(_)
        )
    }

    /// Map a non-success HTTP status from a provider into the error taxonomy.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        let msg = format!("status={} body={}", status, body);
        match status.as_u16() {
            429 => ParleyError::RateLimited(msg),
            408 => ParleyError::Timeout(msg),
            401 | 403 => ParleyError::Auth(msg),
            s if s >= 500 => ParleyError::Transient(msg),
            _ => ParleyError::InvalidRequest(msg),
        }
    }
}

impl From<reqwest::Error> for ParleyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ParleyError::Timeout(e.to_string())
        } else if e.is_connect() {
            ParleyError::Transient(e.to_string())
        } else if let Some(status) = e.status() {
            ParleyError::from_status(status, e.to_string())
        } else {
            ParleyError::Http(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
