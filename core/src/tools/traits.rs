use super::error::ToolResult;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A declared parameter of a tool. Parameters with a default are optional.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub default: Option<Value>,
}

impl ToolParam {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default: Some(default),
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// The core trait for all host capabilities a model can call
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name the model calls the tool by (e.g., "getCurrentTime")
    fn name(&self) -> String;

    /// A human-readable description of what the tool does
    fn description(&self) -> String;

    /// The JSON Schema for the tool's arguments
    fn parameters(&self) -> Value;

    /// Declared parameter list, by default read back from the JSON schema:
    /// properties listed under `required` have no default.
    fn params(&self) -> Vec<ToolParam> {
        let schema = self.parameters();
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        let Some(props) = schema.get("properties").and_then(|p| p.as_object()) else {
            return Vec::new();
        };
        props
            .iter()
            .map(|(name, prop)| {
                let description = prop
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string();
                if required.contains(&name.as_str()) {
                    ToolParam::required(name.clone(), description)
                } else {
                    let default = prop.get("default").cloned().unwrap_or(Value::Null);
                    ToolParam::optional(name.clone(), description, default)
                }
            })
            .collect()
    }

    /// Execute the tool with the given arguments
    async fn call(&self, arguments: Map<String, Value>) -> ToolResult<Value>;
}
