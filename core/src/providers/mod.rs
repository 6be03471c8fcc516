//! Provider adapters: one uniform `generate` capability per LLM backend
//!
//! This module provides:
//! - `ProviderId` for the supported backends
//! - `ProviderAdapter`, the contract every backend implements
//! - `AdapterFactory` / `HttpAdapterFactory` for constructing adapters on switch
//! - OpenAI-compatible (OpenAI, Groq), Anthropic and Ollama adapters
//!
//! All shape translation stays inside the adapters; callers only ever see
//! [`ModelOutput`].

mod anthropic;
mod lines;
mod ollama;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use crate::config::EngineConfig;
use crate::message::{FunctionCallRequest, Message, Role};
use crate::tools::FunctionDescriptor;
use crate::{ParleyError, Result};

/// Supported LLM backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    Groq,
    Ollama,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::Groq,
        ProviderId::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Groq => "groq",
            ProviderId::Ollama => "ollama",
        }
    }

    /// Local backends run without a credential.
    pub fn requires_credential(&self) -> bool {
        !matches!(self, ProviderId::Ollama)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderId::OpenAi),
            "anthropic" | "claude" => Ok(ProviderId::Anthropic),
            "groq" => Ok(ProviderId::Groq),
            "ollama" | "local" => Ok(ProviderId::Ollama),
            other => Err(ParleyError::ProviderUnavailable(format!(
                "unknown provider '{}'",
                other
            ))),
        }
    }
}

/// Lazy sequence of text fragments
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// What a single model call produced
pub enum ModelOutput {
    Text(String),
    Stream(TokenStream),
    FunctionCall(FunctionCallRequest),
}

impl fmt::Debug for ModelOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelOutput::Text(t) => f.debug_tuple("Text").field(t).finish(),
            ModelOutput::Stream(_) => f.write_str("Stream(..)"),
            ModelOutput::FunctionCall(c) => f.debug_tuple("FunctionCall").field(c).finish(),
        }
    }
}

/// Everything an adapter needs for one call
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
    pub functions: Vec<FunctionDescriptor>,
}

impl GenerateRequest {
    /// Streaming is only honoured when no functions are exposed; a function
    /// call needs the complete payload before it can be dispatched.
    pub fn wants_stream(&self) -> bool {
        self.stream && self.functions.is_empty()
    }
}

/// Uniform contract implemented by every backend
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    /// Whether `load_model` must run before a model can serve requests
    fn requires_load(&self) -> bool {
        false
    }

    /// Make `model` ready to serve (local inference backends)
    async fn load_model(&self, _model: &str) -> Result<()> {
        Ok(())
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ModelOutput>;
}

/// Builds adapters when the active provider changes
pub trait AdapterFactory: Send + Sync {
    fn build(&self, provider: ProviderId) -> Result<Arc<dyn ProviderAdapter>>;
}

/// Factory producing the HTTP adapters from engine configuration
#[derive(Debug, Clone)]
pub struct HttpAdapterFactory {
    config: EngineConfig,
}

impl HttpAdapterFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl AdapterFactory for HttpAdapterFactory {
    fn build(&self, provider: ProviderId) -> Result<Arc<dyn ProviderAdapter>> {
        let settings = self.config.provider(provider);
        if provider.requires_credential() && settings.api_key.is_none() {
            return Err(ParleyError::ProviderUnavailable(format!(
                "no credential configured for {}",
                provider
            )));
        }
        let adapter: Arc<dyn ProviderAdapter> = match provider {
            ProviderId::OpenAi | ProviderId::Groq => {
                Arc::new(OpenAiAdapter::new(provider, settings)?)
            }
            ProviderId::Anthropic => Arc::new(AnthropicAdapter::new(settings)?),
            ProviderId::Ollama => Arc::new(OllamaAdapter::new(settings)?),
        };
        Ok(adapter)
    }
}

pub(crate) fn http_client(timeout_ms: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| ParleyError::Configuration(format!("Failed to build HTTP client: {e}")))
}

/// Role and content for a message on backends without a function role.
///
/// Function results become system notes tagged with the function name.
pub(crate) fn flatten_function(msg: &Message) -> (Role, String) {
    match (msg.role, &msg.function_name) {
        (Role::Function, Some(name)) => (Role::System, format!("[{}] {}", name, msg.content)),
        (Role::Function, None) => (Role::System, msg.content.clone()),
        (role, _) => (role, msg.content.clone()),
    }
}

/// Reject a non-success response with the error class its status implies.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(ParleyError::from_status(status, body))
}
