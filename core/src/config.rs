//! Engine configuration: environment-driven defaults with an optional TOML overlay

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::providers::ProviderId;
use crate::retry::MAX_ATTEMPTS;
use crate::{ParleyError, Result};

/// Connection settings for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            request_timeout_ms: 30_000,
        }
    }
}

impl ProviderSettings {
    fn from_env(url_var: &str, default_url: &str, key_var: Option<&str>, timeout_ms: u64) -> Self {
        Self {
            base_url: env_string(url_var).unwrap_or_else(|| default_url.to_string()),
            api_key: key_var.and_then(env_string),
            request_timeout_ms: timeout_ms,
        }
    }
}

/// Backoff parameters for transient provider errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 4_000,
            max_delay_ms: 10_000,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_provider: ProviderId,
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    pub groq: ProviderSettings,
    pub ollama: ProviderSettings,
    pub catalog_dir: Option<PathBuf>,
    pub temperature: f32,
    pub retry: RetrySettings,
    pub max_tool_iterations: usize,
    pub tool_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let timeout_ms = env_parse::<u64>("REQUEST_TIMEOUT_MS").unwrap_or(30_000);
        let default_provider = match env_string("PARLEY_DEFAULT_PROVIDER") {
            Some(raw) => raw.parse::<ProviderId>().unwrap_or_else(|e| {
                warn!(target: "config", error = %e, "Ignoring PARLEY_DEFAULT_PROVIDER");
                ProviderId::OpenAi
            }),
            None => ProviderId::OpenAi,
        };
        Self {
            default_provider,
            openai: ProviderSettings::from_env(
                "OPENAI_BASE_URL",
                "https://api.openai.com/v1",
                Some("OPENAI_API_KEY"),
                timeout_ms,
            ),
            anthropic: ProviderSettings::from_env(
                "ANTHROPIC_BASE_URL",
                "https://api.anthropic.com",
                Some("ANTHROPIC_API_KEY"),
                timeout_ms,
            ),
            groq: ProviderSettings::from_env(
                "GROQ_BASE_URL",
                "https://api.groq.com/openai/v1",
                Some("GROQ_API_KEY"),
                timeout_ms,
            ),
            // local inference is slow to first token
            ollama: ProviderSettings::from_env(
                "OLLAMA_BASE_URL",
                "http://localhost:11434",
                None,
                timeout_ms.max(120_000),
            ),
            catalog_dir: env_string("PARLEY_CATALOG_DIR").map(PathBuf::from),
            temperature: env_parse::<f32>("PARLEY_TEMPERATURE").unwrap_or(0.7),
            retry: RetrySettings::default(),
            max_tool_iterations: env_parse::<usize>("PARLEY_MAX_TOOL_ITERATIONS").unwrap_or(5),
            tool_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file (path via PARLEY_CONFIG or ./parley.toml),
    /// overlaying values onto the env-driven defaults.
    pub fn load() -> Self {
        let path = std::env::var("PARLEY_CONFIG").unwrap_or_else(|_| "parley.toml".into());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Self {
        let default = Self::default();
        if !path.exists() {
            info!(target: "config", path = %path.display(), "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(path) {
            Ok(s) => match Self::default().overlay_toml(&s) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(target: "config", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                warn!(target: "config", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    /// Apply the values present in a TOML document on top of `self`.
    pub fn overlay_toml(self, raw: &str) -> Result<Self> {
        let parsed: EngineToml = toml::from_str(raw)?;
        parsed.overlay(self)
    }

    pub fn provider(&self, id: ProviderId) -> &ProviderSettings {
        match id {
            ProviderId::OpenAi => &self.openai,
            ProviderId::Anthropic => &self.anthropic,
            ProviderId::Groq => &self.groq,
            ProviderId::Ollama => &self.ollama,
        }
    }

    fn provider_mut(&mut self, id: ProviderId) -> &mut ProviderSettings {
        match id {
            ProviderId::OpenAi => &mut self.openai,
            ProviderId::Anthropic => &mut self.anthropic,
            ProviderId::Groq => &mut self.groq,
            ProviderId::Ollama => &mut self.ollama,
        }
    }

    /// Providers that can be constructed with the credentials at hand
    pub fn enabled_providers(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|id| !id.requires_credential() || self.provider(*id).api_key.is_some())
            .collect()
    }

    /// The default provider must be usable; any other provider may be disabled.
    pub fn validate(&self) -> Result<()> {
        let id = self.default_provider;
        if id.requires_credential() && self.provider(id).api_key.is_none() {
            return Err(ParleyError::Configuration(format!(
                "missing API key for default provider {}",
                id
            )));
        }
        for disabled in ProviderId::ALL
            .into_iter()
            .filter(|p| !self.enabled_providers().contains(p))
        {
            info!(target: "config", provider = %disabled, "Provider disabled: no credential");
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, Deserialize)]
struct EngineToml {
    pub default_provider: Option<String>,
    pub catalog_dir: Option<PathBuf>,
    pub temperature: Option<f32>,
    pub max_tool_iterations: Option<usize>,
    pub tool_timeout_ms: Option<u64>,
    pub retry: Option<RetryToml>,
    pub providers: Option<ProvidersToml>,
}

impl EngineToml {
    fn overlay(self, mut base: EngineConfig) -> Result<EngineConfig> {
        if let Some(p) = self.default_provider {
            base.default_provider = p.parse()?;
        }
        if let Some(d) = self.catalog_dir {
            base.catalog_dir = Some(d);
        }
        if let Some(t) = self.temperature {
            base.temperature = t.clamp(0.0, 2.0);
        }
        if let Some(n) = self.max_tool_iterations {
            base.max_tool_iterations = n.max(1);
        }
        if let Some(ms) = self.tool_timeout_ms {
            base.tool_timeout_ms = ms;
        }
        if let Some(r) = self.retry {
            r.apply(&mut base.retry);
        }
        if let Some(p) = self.providers {
            for (id, section) in [
                (ProviderId::OpenAi, p.openai),
                (ProviderId::Anthropic, p.anthropic),
                (ProviderId::Groq, p.groq),
                (ProviderId::Ollama, p.ollama),
            ] {
                if let Some(s) = section {
                    s.apply(base.provider_mut(id));
                }
            }
        }
        Ok(base)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RetryToml {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

impl RetryToml {
    fn apply(self, r: &mut RetrySettings) {
        if let Some(v) = self.max_attempts {
            r.max_attempts = v.clamp(1, MAX_ATTEMPTS);
        }
        if let Some(v) = self.initial_delay_ms {
            r.initial_delay_ms = v;
        }
        if let Some(v) = self.max_delay_ms {
            r.max_delay_ms = v;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProvidersToml {
    pub openai: Option<ProviderToml>,
    pub anthropic: Option<ProviderToml>,
    pub groq: Option<ProviderToml>,
    pub ollama: Option<ProviderToml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProviderToml {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

impl ProviderToml {
    fn apply(self, s: &mut ProviderSettings) {
        if let Some(v) = self.base_url {
            s.base_url = v;
        }
        if let Some(v) = self.api_key.filter(|k| !k.is_empty()) {
            s.api_key = Some(v);
        }
        if let Some(v) = self.request_timeout_ms {
            s.request_timeout_ms = v;
        }
    }
}
