use async_stream::try_stream;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_stream::StreamExt;
use tracing::debug;

use super::lines::{response_lines, sse_data};
use super::{check_status, flatten_function, http_client, GenerateRequest, ModelOutput};
use super::{ProviderAdapter, ProviderId};
use crate::config::ProviderSettings;
use crate::message::{FunctionCallRequest, Role};
use crate::{ParleyError, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic Messages API
pub struct AnthropicAdapter {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl AnthropicAdapter {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            http: http_client(settings.request_timeout_ms)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    /// System prompts and function notes go into the top-level `system`
    /// field; only user/assistant turns stay in `messages`.
    fn build_body(&self, request: &GenerateRequest) -> Value {
        let mut system = String::new();
        let mut messages = Vec::new();
        for m in &request.messages {
            let (role, content) = flatten_function(m);
            match role {
                Role::System | Role::Function => {
                    if !system.is_empty() {
                        system.push_str("\n\n");
                    }
                    system.push_str(&content);
                }
                Role::User | Role::Assistant => {
                    messages.push(json!({"role": role.as_str(), "content": content}));
                }
            }
        }
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system);
        }
        if !request.functions.is_empty() {
            let tools: Vec<Value> = request
                .functions
                .iter()
                .map(|f| {
                    json!({
                        "name": f.name,
                        "description": f.description,
                        "input_schema": f.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if request.wants_stream() {
            body["stream"] = json!(true);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ModelOutput> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(target: "anthropic", model = %request.model, stream = request.wants_stream(), "POST {}", url);

        let mut req = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .header("anthropic-version", ANTHROPIC_VERSION);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        let resp = check_status(req.json(&self.build_body(request)).send().await?).await?;

        if request.wants_stream() {
            return Ok(ModelOutput::Stream(Box::pin(messages_token_stream(resp))));
        }
        let val: Value = resp.json().await.map_err(|e| {
            ParleyError::MalformedOutput(format!("Failed to parse Messages JSON: {e}"))
        })?;
        parse_messages_output(&val)
    }
}

fn messages_token_stream(resp: reqwest::Response) -> impl tokio_stream::Stream<Item = Result<String>> + Send {
    try_stream! {
        let mut lines = Box::pin(response_lines(resp));
        while let Some(line) = lines.next().await {
            let line = line?;
            let Some(data) = sse_data(&line) else { continue };
            let Ok(event) = serde_json::from_str::<Value>(data) else { continue };
            match event.get("type").and_then(|t| t.as_str()) {
                Some("content_block_delta") => {
                    if let Some(text) = event.pointer("/delta/text").and_then(|t| t.as_str()) {
                        if !text.is_empty() {
                            yield text.to_string();
                        }
                    }
                }
                Some("message_stop") => break,
                Some("error") => {
                    Err::<(), _>(stream_error(&event))?;
                }
                _ => {}
            }
        }
    }
}

fn stream_error(event: &Value) -> ParleyError {
    let kind = event
        .pointer("/error/type")
        .and_then(|t| t.as_str())
        .unwrap_or("");
    let msg = event
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .unwrap_or("stream error")
        .to_string();
    match kind {
        "rate_limit_error" => ParleyError::RateLimited(msg),
        "overloaded_error" | "api_error" => ParleyError::Transient(msg),
        "authentication_error" | "permission_error" => ParleyError::Auth(msg),
        _ => ParleyError::InvalidRequest(msg),
    }
}

/// The first `tool_use` block wins; otherwise all text blocks are joined.
fn parse_messages_output(v: &Value) -> Result<ModelOutput> {
    let blocks = v
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ParleyError::MalformedOutput("Missing content array".into()))?;

    let mut text = String::new();
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("tool_use") => {
                let name = block.get("name").and_then(|n| n.as_str()).unwrap_or("");
                if name.is_empty() {
                    continue;
                }
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                return Ok(ModelOutput::FunctionCall(FunctionCallRequest {
                    id: block.get("id").and_then(|x| x.as_str()).map(|s| s.to_string()),
                    name: name.to_string(),
                    raw_arguments: input.to_string(),
                }));
            }
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text.push_str(t);
                }
            }
            _ => {}
        }
    }
    Ok(ModelOutput::Text(text))
}
