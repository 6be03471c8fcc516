use crate::tools::{Tool, ToolError, ToolResult};
use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use serde_json::{json, Map, Value};

const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reports the host's local time
#[derive(Debug, Default, Clone)]
pub struct CurrentTimeTool;

impl CurrentTimeTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> String {
        "getCurrentTime".to_string()
    }

    fn description(&self) -> String {
        "Get the current local date and time".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "description": "strftime-style format string",
                    "default": DEFAULT_FORMAT
                }
            },
            "required": []
        })
    }

    async fn call(&self, arguments: Map<String, Value>) -> ToolResult<Value> {
        let format = arguments
            .get("format")
            .and_then(|f| f.as_str())
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_FORMAT);

        // chrono panics on Display for invalid specifiers; reject them up front
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(ToolError::InvalidArguments(format!(
                "invalid time format '{}'",
                format
            )));
        }

        let now = chrono::Local::now();
        Ok(json!({
            "time": now.format(format).to_string(),
            "timezone": now.format("%:z").to_string(),
        }))
    }
}
