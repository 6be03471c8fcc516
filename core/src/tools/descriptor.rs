use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::traits::Tool;
use crate::Result;

/// Schema of a callable function as exposed to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    pub fn from_tool(tool: &dyn Tool) -> Self {
        Self::new(tool.name(), tool.description(), tool.parameters())
    }

    /// Parameter names listed as required by the schema
    pub fn required_param_names(&self) -> Vec<String> {
        self.parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Read a descriptor file: a JSON array of function schemas.
///
/// Entries may also use the `{"type": "function", "function": {...}}` wrapper.
pub fn load_descriptors(path: &Path) -> Result<Vec<FunctionDescriptor>> {
    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<Value> = serde_json::from_str(&raw)?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let inner = match entry.get("function") {
            Some(f) if f.is_object() => f.clone(),
            _ => entry,
        };
        out.push(serde_json::from_value::<FunctionDescriptor>(inner)?);
    }
    Ok(out)
}
