//! Model catalog: valid models per provider, defaults, and token limits
//!
//! Each provider has one catalog source `<catalog_dir>/<provider>.json`:
//!
//! ```json
//! { "default": "gpt-4o-mini",
//!   "models": ["gpt-4o", {"id": "gpt-4o-mini", "max_input_tokens": 128000, "max_output_tokens": 16384}] }
//! ```
//!
//! Loading only ever adds to the known set. A missing or corrupt source
//! contributes nothing for that provider.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::providers::ProviderId;
use crate::{ParleyError, Result};

/// Input/output token ceilings for a model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenLimits {
    pub max_input_tokens: u32,
    pub max_output_tokens: u32,
}

impl TokenLimits {
    /// Used for any model the catalog has no entry for.
    pub const CONSERVATIVE: TokenLimits = TokenLimits {
        max_input_tokens: 4096,
        max_output_tokens: 1024,
    };

    pub const fn new(max_input_tokens: u32, max_output_tokens: u32) -> Self {
        Self {
            max_input_tokens,
            max_output_tokens,
        }
    }
}

impl Default for TokenLimits {
    fn default() -> Self {
        Self::CONSERVATIVE
    }
}

/// A catalog entry as it appears in a source file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ModelSpec {
    Id(String),
    Detailed {
        id: String,
        #[serde(default)]
        max_input_tokens: Option<u32>,
        #[serde(default)]
        max_output_tokens: Option<u32>,
    },
}

impl ModelSpec {
    pub fn id(&self) -> &str {
        match self {
            ModelSpec::Id(id) => id,
            ModelSpec::Detailed { id, .. } => id,
        }
    }

    fn limits(&self) -> Option<TokenLimits> {
        match self {
            ModelSpec::Id(_) => None,
            ModelSpec::Detailed {
                max_input_tokens,
                max_output_tokens,
                ..
            } => {
                if max_input_tokens.is_none() && max_output_tokens.is_none() {
                    return None;
                }
                Some(TokenLimits {
                    max_input_tokens: max_input_tokens
                        .unwrap_or(TokenLimits::CONSERVATIVE.max_input_tokens),
                    max_output_tokens: max_output_tokens
                        .unwrap_or(TokenLimits::CONSERVATIVE.max_output_tokens),
                })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogSource {
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    models: Vec<ModelSpec>,
}

#[derive(Debug, Default)]
struct ProviderModels {
    default: Option<String>,
    // insertion ordered, no duplicates
    models: Vec<String>,
}

impl ProviderModels {
    fn insert(&mut self, model: &str) -> bool {
        if self.models.iter().any(|m| m == model) {
            return false;
        }
        self.models.push(model.to_string());
        true
    }
}

#[derive(Debug, Default)]
struct CatalogInner {
    providers: HashMap<ProviderId, ProviderModels>,
    limits: HashMap<String, TokenLimits>,
}

/// Registry of known models per provider
#[derive(Debug, Default)]
pub struct ModelCatalog {
    inner: Mutex<CatalogInner>,
}

impl ModelCatalog {
    /// An empty catalog. Every provider reports `NoModelsConfigured` until loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog seeded with the models each supported provider ships with.
    pub fn with_builtin() -> Self {
        let catalog = Self::new();
        {
            let mut guard = catalog.lock();
            let inner = &mut *guard;
            for (provider, default, models) in builtin_models() {
                let entry = inner.providers.entry(provider).or_default();
                entry.default = Some(default.to_string());
                for (id, limits) in models {
                    entry.insert(id);
                    inner.limits.insert(id.to_string(), *limits);
                }
            }
        }
        catalog
    }

    fn lock(&self) -> MutexGuard<'_, CatalogInner> {
        // a panic while holding the lock cannot leave the maps half-written
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read one catalog source per supported provider from `dir`.
    ///
    /// Returns the number of models each source contributed. Missing or corrupt
    /// sources are logged and contribute an empty list.
    pub fn load(&self, dir: &Path) -> HashMap<ProviderId, usize> {
        let mut loaded = HashMap::new();
        for provider in ProviderId::ALL {
            let path = dir.join(format!("{}.json", provider.as_str()));
            let source = match read_source(&path) {
                Ok(s) => s,
                Err(e) => {
                    warn!(target: "model_catalog", provider = %provider, path = %path.display(), error = %e, "Catalog source unavailable; no models loaded");
                    loaded.insert(provider, 0);
                    continue;
                }
            };

            let mut inner = self.lock();
            let mut count = 0;
            for spec in &source.models {
                if let Some(limits) = spec.limits() {
                    inner.limits.insert(spec.id().to_string(), limits);
                }
                let entry = inner.providers.entry(provider).or_default();
                entry.insert(spec.id());
                count += 1;
            }
            if let Some(default) = source.default.filter(|d| !d.is_empty()) {
                let entry = inner.providers.entry(provider).or_default();
                entry.insert(&default);
                entry.default = Some(default);
            }
            info!(target: "model_catalog", provider = %provider, models = count, "Catalog source loaded");
            loaded.insert(provider, count);
        }
        loaded
    }

    /// The model a freshly selected provider should start with.
    pub fn default_model(&self, provider: ProviderId) -> Result<String> {
        let inner = self.lock();
        inner
            .providers
            .get(&provider)
            .and_then(|p| p.default.clone().or_else(|| p.models.first().cloned()))
            .ok_or_else(|| ParleyError::NoModelsConfigured(provider.to_string()))
    }

    /// Token ceilings for `model`, falling back to [`TokenLimits::CONSERVATIVE`].
    pub fn token_limits(&self, model: &str) -> TokenLimits {
        self.lock()
            .limits
            .get(model)
            .copied()
            .unwrap_or(TokenLimits::CONSERVATIVE)
    }

    /// Add `model` to the provider's known set. Calling it twice changes nothing.
    pub fn set_model(&self, model: &str, provider: ProviderId) {
        let added = self
            .lock()
            .providers
            .entry(provider)
            .or_default()
            .insert(model);
        if added {
            debug!(target: "model_catalog", provider = %provider, model = %model, "Model added to catalog");
        }
    }

    pub fn models(&self, provider: ProviderId) -> Vec<String> {
        self.lock()
            .providers
            .get(&provider)
            .map(|p| p.models.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, provider: ProviderId, model: &str) -> bool {
        self.lock()
            .providers
            .get(&provider)
            .map(|p| p.models.iter().any(|m| m == model))
            .unwrap_or(false)
    }
}

fn read_source(path: &Path) -> Result<CatalogSource> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

type BuiltinEntry = (ProviderId, &'static str, &'static [(&'static str, TokenLimits)]);

fn builtin_models() -> [BuiltinEntry; 4] {
    const OPENAI: &[(&str, TokenLimits)] = &[
        ("gpt-4o-mini", TokenLimits::new(128_000, 16_384)),
        ("gpt-4o", TokenLimits::new(128_000, 16_384)),
        ("gpt-4.1-mini", TokenLimits::new(1_047_576, 32_768)),
    ];
    const ANTHROPIC: &[(&str, TokenLimits)] = &[
        ("claude-3-5-haiku-latest", TokenLimits::new(200_000, 8_192)),
        ("claude-3-5-sonnet-latest", TokenLimits::new(200_000, 8_192)),
    ];
    const GROQ: &[(&str, TokenLimits)] = &[
        ("llama-3.3-70b-versatile", TokenLimits::new(128_000, 32_768)),
        ("llama-3.1-8b-instant", TokenLimits::new(128_000, 8_192)),
    ];
    const OLLAMA: &[(&str, TokenLimits)] = &[
        ("llama3.2", TokenLimits::new(128_000, 2_048)),
        ("qwen2.5", TokenLimits::new(32_768, 2_048)),
    ];
    [
        (ProviderId::OpenAi, "gpt-4o-mini", OPENAI),
        (ProviderId::Anthropic, "claude-3-5-haiku-latest", ANTHROPIC),
        (ProviderId::Groq, "llama-3.3-70b-versatile", GROQ),
        (ProviderId::Ollama, "llama3.2", OLLAMA),
    ]
}
