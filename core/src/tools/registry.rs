use super::descriptor::{load_descriptors, FunctionDescriptor};
use super::error::{ToolError, ToolResult};
use super::traits::Tool;
use crate::persona::{Persona, PluginCatalog};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// The callables and function schemas available to one persona
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<DashMap<String, Arc<dyn Tool>>>,
    descriptors: Arc<RwLock<Vec<FunctionDescriptor>>>,
    call_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(DashMap::new()),
            descriptors: Arc::new(RwLock::new(Vec::new())),
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Build the registry for `persona`.
    ///
    /// Descriptors come from the persona's descriptor file and callables from
    /// the plugin bindings registered under the persona's name. A bound tool
    /// the file does not describe is exposed with its own schema. Either
    /// source may be absent.
    pub fn load(persona: &Persona, plugins: &PluginCatalog) -> Self {
        let registry = Self::new();

        match &persona.tools_descriptor_path {
            Some(path) => match load_descriptors(path) {
                Ok(list) => {
                    info!(target: "tool_registry", persona = %persona.name, count = list.len(), "Loaded function descriptors");
                    *registry.write_descriptors() = list;
                }
                Err(e) => {
                    warn!(target: "tool_registry", persona = %persona.name, path = %path.display(), error = %e, "Function descriptors unavailable; exposing none");
                }
            },
            None => {
                debug!(target: "tool_registry", persona = %persona.name, "Persona declares no function descriptors");
            }
        }

        for tool in plugins.tools_for(&persona.name) {
            registry.bind(Arc::clone(tool));
        }

        // bound tools missing from the descriptor file are described from their own schema
        {
            let mut descriptors = registry.write_descriptors();
            for tool in plugins.tools_for(&persona.name) {
                let name = tool.name();
                if !descriptors.iter().any(|d| d.name == name) {
                    debug!(target: "tool_registry", persona = %persona.name, function = %name, "Describing bound tool from its schema");
                    descriptors.push(FunctionDescriptor::from_tool(tool.as_ref()));
                }
            }
        }

        for d in registry.descriptors() {
            if !registry.tools.contains_key(&d.name) {
                warn!(target: "tool_registry", persona = %persona.name, function = %d.name, "Descriptor has no bound callable");
            }
        }
        registry
    }

    fn write_descriptors(&self) -> std::sync::RwLockWriteGuard<'_, Vec<FunctionDescriptor>> {
        self.descriptors.write().unwrap_or_else(|e| e.into_inner())
    }

    fn bind(&self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        debug!(target: "tool_registry", tool = %name, "Binding tool");
        self.tools.insert(name, tool);
    }

    /// Register a tool and expose its schema to the model
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        info!(target: "tool_registry", tool = %name, "Registering tool");
        {
            let mut descriptors = self.write_descriptors();
            if !descriptors.iter().any(|d| d.name == name) {
                descriptors.push(FunctionDescriptor::from_tool(tool.as_ref()));
            }
        }
        self.bind(tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.clone())
    }

    /// List all bound tools
    pub fn list_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.iter().map(|t| t.clone()).collect()
    }

    /// Function schemas exposed to the model
    pub fn descriptors(&self) -> Vec<FunctionDescriptor> {
        self.descriptors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.descriptors().is_empty()
    }

    /// Parameters of `name` that have no default, or `None` for an unknown tool
    pub fn required_params(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).map(|tool| {
            tool.params()
                .into_iter()
                .filter(|p| p.is_required())
                .map(|p| p.name)
                .collect()
        })
    }

    /// Call a tool by name with timeout.
    ///
    /// The tool runs on its own task so that a panic inside it surfaces as
    /// [`ToolError::Internal`] instead of unwinding through the caller.
    #[tracing::instrument(skip(self, arguments), fields(tool.name = %name))]
    pub async fn call(&self, name: &str, arguments: Map<String, Value>) -> ToolResult<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        debug!(target: "tool_registry", tool = %name, "Invoking tool");

        let mut handle = tokio::spawn(async move { tool.call(arguments).await });
        let result = match timeout(self.call_timeout, &mut handle).await {
            Ok(Ok(res)) => res,
            Ok(Err(join_err)) => Err(ToolError::Internal(format!("tool task failed: {}", join_err))),
            Err(_) => {
                handle.abort();
                warn!(target: "tool_registry", tool = %name, "Tool execution timed out");
                Err(ToolError::Timeout)
            }
        };

        if let Err(e) = &result {
            warn!(target: "tool_registry", tool = %name, error = %e, "Tool execution failed");
        }
        result
    }
}
