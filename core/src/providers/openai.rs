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
use crate::message::FunctionCallRequest;
use crate::{ParleyError, Result};

/// Adapter for Chat Completions compatible backends (OpenAI, Groq)
pub struct OpenAiAdapter {
    provider: ProviderId,
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiAdapter {
    pub fn new(provider: ProviderId, settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            provider,
            http: http_client(settings.request_timeout_ms)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    fn build_body(&self, request: &GenerateRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let (role, content) = flatten_function(m);
                json!({"role": role.as_str(), "content": content})
            })
            .collect();
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if !request.functions.is_empty() {
            let tools: Vec<Value> = request
                .functions
                .iter()
                .map(|f| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": f.name,
                            "description": f.description,
                            "parameters": f.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }
        if request.wants_stream() {
            body["stream"] = json!(true);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider_id(&self) -> ProviderId {
        self.provider
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ModelOutput> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(target: "openai", provider = %self.provider, model = %request.model, stream = request.wants_stream(), "POST {}", url);

        let mut req = self
            .http
            .post(&url)
            .header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = check_status(req.json(&self.build_body(request)).send().await?).await?;

        if request.wants_stream() {
            return Ok(ModelOutput::Stream(Box::pin(chat_token_stream(resp))));
        }
        let val: Value = resp
            .json()
            .await
            .map_err(|e| ParleyError::MalformedOutput(format!("Failed to parse Chat JSON: {e}")))?;
        parse_chat_output(&val)
    }
}

fn chat_token_stream(resp: reqwest::Response) -> impl tokio_stream::Stream<Item = Result<String>> + Send {
    try_stream! {
        let mut lines = Box::pin(response_lines(resp));
        while let Some(line) = lines.next().await {
            let line = line?;
            let Some(data) = sse_data(&line) else { continue };
            if data == "[DONE]" {
                break;
            }
            let Ok(chunk) = serde_json::from_str::<Value>(data) else { continue };
            if let Some(text) = chunk
                .pointer("/choices/0/delta/content")
                .and_then(|c| c.as_str())
            {
                if !text.is_empty() {
                    yield text.to_string();
                }
            }
        }
    }
}

/// Turn a Chat Completions body into text or a function call.
fn parse_chat_output(v: &Value) -> Result<ModelOutput> {
    let message = v
        .pointer("/choices/0/message")
        .ok_or_else(|| ParleyError::MalformedOutput("Missing choices[0].message".into()))?;

    if let Some(tc) = message
        .get("tool_calls")
        .and_then(|x| x.as_array())
        .and_then(|a| a.first())
    {
        if let Some(func) = tc.get("function") {
            let name = func.get("name").and_then(|n| n.as_str()).unwrap_or("");
            if !name.is_empty() {
                return Ok(ModelOutput::FunctionCall(FunctionCallRequest {
                    id: tc.get("id").and_then(|x| x.as_str()).map(|s| s.to_string()),
                    name: name.to_string(),
                    raw_arguments: raw_arguments(func.get("arguments")),
                }));
            }
        }
    }

    // legacy single function_call field
    if let Some(func) = message.get("function_call") {
        let name = func.get("name").and_then(|n| n.as_str()).unwrap_or("");
        if !name.is_empty() {
            return Ok(ModelOutput::FunctionCall(FunctionCallRequest {
                id: None,
                name: name.to_string(),
                raw_arguments: raw_arguments(func.get("arguments")),
            }));
        }
    }

    let text = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    Ok(ModelOutput::Text(text))
}

fn raw_arguments(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
