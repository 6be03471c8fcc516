use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::error::ToolResult;
use super::traits::{Tool, ToolParam};

type BoxedCall = Pin<Box<dyn Future<Output = ToolResult<Value>> + Send>>;
type Handler = Arc<dyn Fn(Map<String, Value>) -> BoxedCall + Send + Sync>;

/// A tool backed by an async closure and an explicit parameter list.
///
/// Defaults of optional parameters are filled in before the closure runs.
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    params: Vec<ToolParam>,
    handler: Handler,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            handler: Arc::new(move |args| -> BoxedCall { Box::pin(handler(args)) }),
        }
    }

    pub fn param(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.params.push(ToolParam::required(name, description));
        self
    }

    pub fn param_with_default(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        default: Value,
    ) -> Self {
        self.params.push(ToolParam::optional(name, description, default));
        self
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn parameters(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            let mut prop = json!({"description": p.description});
            if let Some(default) = &p.default {
                prop["default"] = default.clone();
            }
            properties.insert(p.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.is_required())
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    fn params(&self) -> Vec<ToolParam> {
        self.params.clone()
    }

    async fn call(&self, mut arguments: Map<String, Value>) -> ToolResult<Value> {
        for p in &self.params {
            if let Some(default) = &p.default {
                arguments
                    .entry(p.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        (self.handler)(arguments).await
    }
}
