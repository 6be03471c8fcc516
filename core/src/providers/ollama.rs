use async_stream::try_stream;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_stream::StreamExt;
use tracing::{debug, info};

use super::lines::response_lines;
use super::{check_status, flatten_function, http_client, GenerateRequest, ModelOutput};
use super::{ProviderAdapter, ProviderId};
use crate::config::ProviderSettings;
use crate::message::FunctionCallRequest;
use crate::{ParleyError, Result};

/// How long a loaded model stays resident after the last request
const KEEP_ALIVE: &str = "30m";

/// Adapter for a local Ollama inference server
pub struct OllamaAdapter {
    http: Client,
    base_url: String,
}

impl OllamaAdapter {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            http: http_client(settings.request_timeout_ms)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
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
            "stream": request.wants_stream(),
            "keep_alive": KEEP_ALIVE,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
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
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Ollama
    }

    fn requires_load(&self) -> bool {
        true
    }

    /// An empty generate request makes the server load and pin the model.
    async fn load_model(&self, model: &str) -> Result<()> {
        let url = format!("{}/api/generate", self.base_url);
        info!(target: "ollama", model = %model, "Loading local model");
        let body = json!({"model": model, "prompt": "", "stream": false, "keep_alive": KEEP_ALIVE});
        check_status(self.http.post(&url).json(&body).send().await?).await?;
        Ok(())
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ModelOutput> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(target: "ollama", model = %request.model, stream = request.wants_stream(), "POST {}", url);

        let resp = check_status(
            self.http
                .post(&url)
                .json(&self.build_body(request))
                .send()
                .await?,
        )
        .await?;

        if request.wants_stream() {
            return Ok(ModelOutput::Stream(Box::pin(ndjson_token_stream(resp))));
        }
        let val: Value = resp
            .json()
            .await
            .map_err(|e| ParleyError::MalformedOutput(format!("Failed to parse chat JSON: {e}")))?;
        parse_chat_output(&val)
    }
}

fn ndjson_token_stream(resp: reqwest::Response) -> impl tokio_stream::Stream<Item = Result<String>> + Send {
    try_stream! {
        let mut lines = Box::pin(response_lines(resp));
        while let Some(line) = lines.next().await {
            let line = line?;
            let Ok(chunk) = serde_json::from_str::<Value>(&line) else { continue };
            if let Some(err) = chunk.get("error").and_then(|e| e.as_str()) {
                Err::<(), _>(ParleyError::Transient(err.to_string()))?;
            }
            if let Some(text) = chunk.pointer("/message/content").and_then(|c| c.as_str()) {
                if !text.is_empty() {
                    yield text.to_string();
                }
            }
            if chunk.get("done").and_then(|d| d.as_bool()) == Some(true) {
                break;
            }
        }
    }
}

fn parse_chat_output(v: &Value) -> Result<ModelOutput> {
    let message = v
        .get("message")
        .ok_or_else(|| ParleyError::MalformedOutput("Missing message".into()))?;

    if let Some(func) = message
        .get("tool_calls")
        .and_then(|x| x.as_array())
        .and_then(|a| a.first())
        .and_then(|tc| tc.get("function"))
    {
        let name = func.get("name").and_then(|n| n.as_str()).unwrap_or("");
        if !name.is_empty() {
            // arguments arrive as an object here, unlike the OpenAI wire format
            let raw_arguments = match func.get("arguments") {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => String::new(),
            };
            return Ok(ModelOutput::FunctionCall(FunctionCallRequest {
                id: None,
                name: name.to_string(),
                raw_arguments,
            }));
        }
    }

    Ok(ModelOutput::Text(
        message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string(),
    ))
}
