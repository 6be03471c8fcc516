use std::fs;
use std::path::{Path, PathBuf};

use parley_core::{GenerateOptions, Persona};
use serde::Deserialize;

/// High-level configuration for the chat demo
#[derive(Clone, Debug)]
pub struct ChatAgentConfig {
    pub persona: PersonaConfig,
    pub user: String,
    pub conversation_id: String,
    /// Ask the provider for a token stream when no tools are exposed
    pub stream: bool,
    pub max_tokens: Option<u32>,
}

/// Persona the demo talks as
#[derive(Clone, Debug)]
pub struct PersonaConfig {
    pub name: String,
    pub system_prompt: String,
    pub functions_path: Option<PathBuf>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: std::env::var("CHAT_PERSONA")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Assistant".to_string()),
            system_prompt: std::env::var("CHAT_SYSTEM_PROMPT").unwrap_or_else(|_| {
                "You are a helpful and concise assistant. Use the available functions when they help."
                    .into()
            }),
            functions_path: std::env::var("CHAT_FUNCTIONS_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }
}

impl Default for ChatAgentConfig {
    fn default() -> Self {
        Self {
            persona: PersonaConfig::default(),
            user: std::env::var("USER").unwrap_or_else(|_| "local".to_string()),
            conversation_id: "default".to_string(),
            stream: false,
            max_tokens: None,
        }
    }
}

impl ChatAgentConfig {
    /// Load configuration from a TOML file (path via CHAT_AGENT_CONFIG or ./chat_agent.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let path = std::env::var("CHAT_AGENT_CONFIG").unwrap_or_else(|_| "chat_agent.toml".into());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(p: &Path) -> Self {
        let default = Self::default();
        if !p.exists() {
            tracing::info!(target = "chat_agent", path = %p.display(), "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match toml::from_str::<ChatAgentToml>(&s) {
                Ok(t) => t.overlay(default),
                Err(e) => {
                    tracing::warn!(target = "chat_agent", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target = "chat_agent", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    pub fn persona(&self) -> Persona {
        let persona = Persona::new(&self.persona.name, &self.persona.system_prompt);
        match &self.persona.functions_path {
            Some(path) => persona.with_descriptors(path.clone()),
            None => persona,
        }
    }

    pub fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            max_tokens: self.max_tokens,
            stream: self.stream,
            ..Default::default()
        }
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, Deserialize)]
struct ChatAgentToml {
    pub agent: Option<AgentToml>,
    pub persona: Option<PersonaToml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AgentToml {
    pub user: Option<String>,
    pub conversation_id: Option<String>,
    pub stream: Option<bool>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PersonaToml {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
    pub functions_path: Option<PathBuf>,
}

impl ChatAgentToml {
    fn overlay(self, mut base: ChatAgentConfig) -> ChatAgentConfig {
        if let Some(a) = self.agent {
            if let Some(v) = a.user.filter(|s| !s.is_empty()) {
                base.user = v;
            }
            if let Some(v) = a.conversation_id.filter(|s| !s.is_empty()) {
                base.conversation_id = v;
            }
            if let Some(v) = a.stream {
                base.stream = v;
            }
            if let Some(v) = a.max_tokens {
                base.max_tokens = Some(v);
            }
        }
        if let Some(p) = self.persona {
            if let Some(v) = p.name.filter(|s| !s.is_empty()) {
                base.persona.name = v;
            }
            if let Some(v) = p.system_prompt {
                base.persona.system_prompt = v;
            }
            if let Some(v) = p.functions_path {
                base.persona.functions_path = Some(v);
            }
        }
        base
    }
}
