//! Provider manager: owns which backend answers the next request
//!
//! One instance is constructed per application and shared by handle. The
//! committed [`ProviderState`] is swapped atomically: readers observe either
//! the previous state or the fully built new one.

use std::path::Path;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn, Span};

use crate::catalog::ModelCatalog;
use crate::config::EngineConfig;
use crate::dispatch::ToolDispatchLoop;
use crate::message::Message;
use crate::persona::{Persona, PluginCatalog};
use crate::providers::{
    AdapterFactory, GenerateRequest, HttpAdapterFactory, ModelOutput, ProviderAdapter, ProviderId,
    TokenStream,
};
use crate::retry::RetryPolicy;
use crate::tools::ToolRegistry;
use crate::{ParleyError, Result};

/// Synthetic follow-up sent once when a model answers with nothing at all
const EMPTY_REPLY_REPROMPT: &str =
    "Your previous reply was empty. Please answer the user's last message.";

/// The backend currently answering requests
#[derive(Clone)]
pub struct ProviderState {
    pub provider: ProviderId,
    pub model: String,
    pub adapter: Arc<dyn ProviderAdapter>,
}

impl std::fmt::Debug for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderState")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish()
    }
}

/// Per-call overrides for [`ProviderManager::generate_response`]
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stream: bool,
}

impl GenerateOptions {
    pub fn streaming() -> Self {
        Self {
            stream: true,
            ..Default::default()
        }
    }
}

/// Final answer surfaced to the caller
pub enum Response {
    Text(String),
    Stream(TokenStream),
}

impl Response {
    pub async fn into_text(self) -> Result<String> {
        match self {
            Response::Text(t) => Ok(t),
            Response::Stream(s) => ProviderManager::process_streaming_response(s).await,
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Response::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Response::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

pub struct ProviderManager {
    default_provider: ProviderId,
    temperature: f32,
    tool_timeout: std::time::Duration,
    catalog: Arc<ModelCatalog>,
    factory: Arc<dyn AdapterFactory>,
    retry: RetryPolicy,
    dispatcher: ToolDispatchLoop,
    state: RwLock<Option<Arc<ProviderState>>>,
    tools: RwLock<Arc<ToolRegistry>>,
    // linearizes switch_provider / set_model
    switch_lock: Mutex<()>,
}

impl ProviderManager {
    pub fn new(config: &EngineConfig, catalog: Arc<ModelCatalog>, factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            default_provider: config.default_provider,
            temperature: config.temperature,
            tool_timeout: std::time::Duration::from_millis(config.tool_timeout_ms),
            catalog,
            factory,
            retry: RetryPolicy::from_settings(&config.retry),
            dispatcher: ToolDispatchLoop::new(config.max_tool_iterations),
            state: RwLock::new(None),
            tools: RwLock::new(Arc::new(ToolRegistry::new())),
            switch_lock: Mutex::new(()),
        }
    }

    /// Validate `config`, build the catalog (built-in models plus the catalog
    /// directory, if any) and use the HTTP adapters.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let catalog = ModelCatalog::with_builtin();
        if let Some(dir) = &config.catalog_dir {
            catalog.load(Path::new(dir));
        }
        let factory = Arc::new(HttpAdapterFactory::new(config.clone()));
        Ok(Self::new(&config, Arc::new(catalog), factory))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn default_provider(&self) -> ProviderId {
        self.default_provider
    }

    pub fn dispatcher(&self) -> &ToolDispatchLoop {
        &self.dispatcher
    }

    /// Snapshot of the committed state
    pub fn current(&self) -> Option<Arc<ProviderState>> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn active_provider(&self) -> Option<ProviderId> {
        self.current().map(|s| s.provider)
    }

    pub fn active_model(&self) -> Option<String> {
        self.current().map(|s| s.model.clone())
    }

    fn commit(&self, state: ProviderState) {
        info!(target: "provider_manager", provider = %state.provider, model = %state.model, "Provider state committed");
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(state));
    }

    pub fn tools(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.tools.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn set_tools(&self, registry: ToolRegistry) {
        *self.tools.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(registry);
    }

    /// Rebuild the tool registry for a newly active persona
    pub fn switch_persona(&self, persona: &Persona, plugins: &PluginCatalog) {
        let registry = ToolRegistry::load(persona, plugins).with_timeout(self.tool_timeout);
        info!(target: "provider_manager", persona = %persona.name, functions = registry.descriptors().len(), "Persona tools loaded");
        self.set_tools(registry);
    }

    /// Make `id` the active provider.
    ///
    /// Unknown ids, and providers that cannot be built, degrade to the default
    /// provider with a warning. Returns the provider that ended up active.
    #[tracing::instrument(skip(self), fields(resolved))]
    pub async fn switch_provider(&self, id: &str) -> Result<ProviderId> {
        let requested = match id.parse::<ProviderId>() {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "provider_manager", requested = %id, fallback = %self.default_provider, error = %e, "Unknown provider; falling back to default");
                self.default_provider
            }
        };
        let resolved = self.activate(requested).await?;
        Span::current().record("resolved", resolved.as_str());
        Ok(resolved)
    }

    async fn activate(&self, provider: ProviderId) -> Result<ProviderId> {
        let _guard = self.switch_lock.lock().await;

        if self.active_provider() == Some(provider) {
            debug!(target: "provider_manager", provider = %provider, "Provider already active");
            return Ok(provider);
        }

        match self.build_state(provider).await {
            Ok(state) => {
                self.commit(state);
                Ok(provider)
            }
            Err(e) if provider != self.default_provider => {
                warn!(target: "provider_manager", provider = %provider, fallback = %self.default_provider, error = %e, "Provider unavailable; falling back to default");
                if self.active_provider() == Some(self.default_provider) {
                    return Ok(self.default_provider);
                }
                let state = self.build_state(self.default_provider).await?;
                self.commit(state);
                Ok(self.default_provider)
            }
            Err(e) => Err(e),
        }
    }

    /// Construct an adapter and resolve its default model without publishing anything.
    async fn build_state(&self, provider: ProviderId) -> Result<ProviderState> {
        let adapter = self.factory.build(provider)?;
        let model = self.catalog.default_model(provider)?;
        if adapter.requires_load() {
            self.retry
                .run("load_model", || adapter.load_model(&model))
                .await?;
        }
        Ok(ProviderState {
            provider,
            model,
            adapter,
        })
    }

    /// Select `model` on the active provider, loading it first where the backend needs that.
    pub async fn set_model(&self, model: &str) -> Result<()> {
        let _guard = self.switch_lock.lock().await;
        let current = self.current().ok_or(ParleyError::NotInitialized)?;
        if current.model == model {
            return Ok(());
        }
        if current.adapter.requires_load() {
            self.retry
                .run("load_model", || current.adapter.load_model(model))
                .await?;
        }
        self.catalog.set_model(model, current.provider);
        self.commit(ProviderState {
            provider: current.provider,
            model: model.to_string(),
            adapter: Arc::clone(&current.adapter),
        });
        Ok(())
    }

    /// The single entry point for producing an answer.
    ///
    /// Applies the provider/model overrides in `options`, calls the active
    /// adapter under the retry policy, and hands function calls to the
    /// dispatch loop.
    #[tracing::instrument(name = "generate_response", skip_all, fields(provider, model, stream = options.stream))]
    pub async fn generate_response(&self, messages: &[Message], options: &GenerateOptions) -> Result<Response> {
        if let Some(p) = &options.provider {
            self.switch_provider(p).await?;
        }
        if let Some(m) = &options.model {
            self.set_model(m).await?;
        }

        match self.complete(messages, options, options.stream).await? {
            ModelOutput::Text(text) => Ok(Response::Text(text)),
            ModelOutput::Stream(stream) => Ok(Response::Stream(stream)),
            ModelOutput::FunctionCall(call) => {
                let tools = self.tools();
                let text = self
                    .dispatcher
                    .run(self, &tools, messages, call, options)
                    .await?;
                Ok(Response::Text(text))
            }
        }
    }

    /// One model call on the committed state.
    ///
    /// An empty answer without a function call gets exactly one synthetic
    /// re-prompt; whatever comes back then is returned as is. A stream counts
    /// as empty when it ends before yielding anything but whitespace.
    pub(crate) async fn complete(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        stream: bool,
    ) -> Result<ModelOutput> {
        let state = self.current().ok_or(ParleyError::NotInitialized)?;
        Span::current().record("provider", state.provider.as_str());
        Span::current().record("model", state.model.as_str());

        let mut request = self.build_request(&state, messages.to_vec(), options, stream);
        let output = match self.call_adapter(&state, &request).await? {
            ModelOutput::Stream(stream) => match peek_stream(stream).await? {
                Some(stream) => ModelOutput::Stream(stream),
                None => ModelOutput::Text(String::new()),
            },
            other => other,
        };

        match output {
            ModelOutput::Text(text) if text.trim().is_empty() => {
                warn!(target: "provider_manager", provider = %state.provider, "Empty model reply; re-prompting once");
                request.messages.push(Message::system(EMPTY_REPLY_REPROMPT));
                request.stream = false;
                self.call_adapter(&state, &request).await
            }
            other => Ok(other),
        }
    }

    fn build_request(
        &self,
        state: &ProviderState,
        messages: Vec<Message>,
        options: &GenerateOptions,
        stream: bool,
    ) -> GenerateRequest {
        let limits = self.catalog.token_limits(&state.model);
        GenerateRequest {
            messages,
            model: state.model.clone(),
            max_tokens: options
                .max_tokens
                .map(|t| t.min(limits.max_output_tokens))
                .unwrap_or(limits.max_output_tokens),
            temperature: options.temperature.unwrap_or(self.temperature),
            stream,
            functions: self.tools().descriptors(),
        }
    }

    async fn call_adapter(&self, state: &ProviderState, request: &GenerateRequest) -> Result<ModelOutput> {
        self.retry
            .run("generate", || state.adapter.generate(request))
            .await
    }

    /// Drain a token stream into one string.
    pub async fn process_streaming_response(mut stream: TokenStream) -> Result<String> {
        let mut out = String::new();
        while let Some(fragment) = stream.next().await {
            out.push_str(&fragment?);
        }
        Ok(out)
    }
}

/// Hold back leading whitespace-only fragments until real content shows up.
///
/// Returns `None` when the stream finishes without any; otherwise a stream
/// replaying the held fragments followed by the rest.
async fn peek_stream(mut stream: TokenStream) -> Result<Option<TokenStream>> {
    let mut head = Vec::new();
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        let has_content = !fragment.trim().is_empty();
        head.push(fragment);
        if has_content {
            let replay = tokio_stream::iter(head.into_iter().map(Ok::<String, ParleyError>));
            let joined: TokenStream = Box::pin(replay.chain(stream));
            return Ok(Some(joined));
        }
    }
    Ok(None)
}
