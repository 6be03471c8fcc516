//! Conversation messages and model-initiated function calls

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a message in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry of the append-only conversation sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            function_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: content.into(),
            function_name: Some(name.into()),
        }
    }
}

/// Function call emitted by a model, arguments still in their raw wire form
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCallRequest {
    pub id: Option<String>,
    pub name: String,
    pub raw_arguments: String,
}

impl FunctionCallRequest {
    pub fn new(name: impl Into<String>, raw_arguments: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            raw_arguments: raw_arguments.into(),
        }
    }

    /// Parse the raw arguments as a JSON object.
    ///
    /// Anything that is not an object (including unparsable text and an empty
    /// string) yields an empty map; the missing-argument check reports it later.
    pub fn parse_arguments(&self) -> Map<String, Value> {
        let raw = self.raw_arguments.trim();
        if raw.is_empty() {
            return Map::new();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_arguments_object() {
        let call = FunctionCallRequest::new("getWeather", r#"{"city":"Oslo"}"#);
        let args = call.parse_arguments();
        assert_eq!(args.get("city"), Some(&Value::String("Oslo".into())));
    }

    #[test]
    fn parse_arguments_garbage_is_empty() {
        assert!(FunctionCallRequest::new("f", "not json").parse_arguments().is_empty());
        assert!(FunctionCallRequest::new("f", "[1,2]").parse_arguments().is_empty());
        assert!(FunctionCallRequest::new("f", "").parse_arguments().is_empty());
    }

    #[test]
    fn role_serializes_lowercase() {
        let m = Message::function("getCurrentTime", "12:00");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "function");
        assert_eq!(v["function_name"], "getCurrentTime");
    }
}
