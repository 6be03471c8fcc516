//! Scripted adapters and factories shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parley_core::{
    AdapterFactory, EngineConfig, GenerateRequest, ModelCatalog, ModelOutput, ParleyError,
    ProviderAdapter, ProviderId, ProviderManager, Result, RetryPolicy,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted model reply
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Stream(Vec<String>),
    Call(String, String),
    RateLimited,
    Auth,
}

impl Step {
    pub fn text(t: &str) -> Self {
        Step::Text(t.to_string())
    }

    pub fn call(name: &str, args: &str) -> Self {
        Step::Call(name.to_string(), args.to_string())
    }
}

/// Adapter replaying a fixed script; answers "ok" once the script runs out
pub struct ScriptedAdapter {
    provider: ProviderId,
    requires_load: bool,
    steps: Mutex<VecDeque<Step>>,
    pub requests: Mutex<Vec<GenerateRequest>>,
    pub loads: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn new(provider: ProviderId, steps: Vec<Step>) -> Self {
        Self {
            provider,
            requires_load: false,
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            loads: Mutex::new(Vec::new()),
        }
    }

    pub fn local(provider: ProviderId, steps: Vec<Step>) -> Self {
        Self {
            requires_load: true,
            ..Self::new(provider, steps)
        }
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider_id(&self) -> ProviderId {
        self.provider
    }

    fn requires_load(&self) -> bool {
        self.requires_load
    }

    async fn load_model(&self, model: &str) -> Result<()> {
        self.loads.lock().unwrap().push(model.to_string());
        Ok(())
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ModelOutput> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::text("ok"));
        match step {
            Step::Text(t) => Ok(ModelOutput::Text(t)),
            Step::Stream(parts) => Ok(ModelOutput::Stream(Box::pin(tokio_stream::iter(
                parts.into_iter().map(Ok::<String, ParleyError>),
            )))),
            Step::Call(name, args) => Ok(ModelOutput::FunctionCall(
                parley_core::FunctionCallRequest::new(name, args),
            )),
            Step::RateLimited => Err(ParleyError::RateLimited("429 slow down".into())),
            Step::Auth => Err(ParleyError::Auth("401 bad key".into())),
        }
    }
}

/// Factory handing out pre-built adapters and counting constructions
#[derive(Default)]
pub struct CountingFactory {
    adapters: HashMap<ProviderId, Arc<ScriptedAdapter>>,
    builds: Mutex<HashMap<ProviderId, usize>>,
    total: AtomicUsize,
}

impl CountingFactory {
    /// Every supported provider, each with an empty script
    pub fn all() -> Self {
        let mut f = Self::default();
        for id in ProviderId::ALL {
            f.adapters
                .insert(id, Arc::new(ScriptedAdapter::new(id, Vec::new())));
        }
        f
    }

    pub fn with_adapter(mut self, adapter: ScriptedAdapter) -> Self {
        self.adapters.insert(adapter.provider_id(), Arc::new(adapter));
        self
    }

    pub fn without(mut self, id: ProviderId) -> Self {
        self.adapters.remove(&id);
        self
    }

    pub fn adapter(&self, id: ProviderId) -> Arc<ScriptedAdapter> {
        Arc::clone(&self.adapters[&id])
    }

    pub fn builds(&self, id: ProviderId) -> usize {
        self.builds.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn total_builds(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl AdapterFactory for CountingFactory {
    fn build(&self, provider: ProviderId) -> Result<Arc<dyn ProviderAdapter>> {
        let adapter = self.adapters.get(&provider).ok_or_else(|| {
            ParleyError::ProviderUnavailable(format!("no credential configured for {}", provider))
        })?;
        *self.builds.lock().unwrap().entry(provider).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        let adapter: Arc<dyn ProviderAdapter> = adapter.clone();
        Ok(adapter)
    }
}

/// Test config: OpenAI default, no real credentials or env involved
pub fn test_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.default_provider = ProviderId::OpenAi;
    cfg.openai.api_key = Some("test-key".into());
    cfg.max_tool_iterations = 5;
    cfg.temperature = 0.2;
    cfg
}

/// Retry policy with millisecond delays so tests stay fast
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

pub fn manager_with(factory: Arc<CountingFactory>) -> ProviderManager {
    ProviderManager::new(&test_config(), Arc::new(ModelCatalog::with_builtin()), factory)
        .with_retry(fast_retry())
}
