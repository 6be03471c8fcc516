//! Personas and the explicit registration of their callable tools

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tools::Tool;

/// A named configuration bundle: system prompt plus allowed tools
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub tools_descriptor_path: Option<PathBuf>,
}

impl Persona {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            tools_descriptor_path: None,
        }
    }

    pub fn with_descriptors(mut self, path: impl Into<PathBuf>) -> Self {
        self.tools_descriptor_path = Some(path.into());
        self
    }
}

/// Tool bindings per persona, supplied at configuration time
#[derive(Clone, Default)]
pub struct PluginCatalog {
    bindings: HashMap<String, Vec<Arc<dyn Tool>>>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `tool` to `persona`. A later binding with the same tool name replaces the earlier one.
    pub fn register(&mut self, persona: &str, tool: Arc<dyn Tool>) -> &mut Self {
        let list = self.bindings.entry(persona.to_string()).or_default();
        let name = tool.name();
        list.retain(|t| t.name() != name);
        list.push(tool);
        self
    }

    pub fn tools_for(&self, persona: &str) -> &[Arc<dyn Tool>] {
        self.bindings
            .get(persona)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
