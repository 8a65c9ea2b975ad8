//! Default completion client for Anthropic-compatible message endpoints

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::client::{CompletionClient, CompletionRequest, CompletionResponse};
use super::types::{AiToolCall, Content, FinishReason, Role, Usage};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Completion client speaking the Anthropic messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Point the client at a compatible non-default endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        // System prompts travel in a dedicated field, not the message list.
        let system: Vec<String> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .flat_map(|m| {
                m.content.iter().filter_map(|c| match c {
                    Content::Text { text } => Some(text.clone()),
                    _ => None,
                })
            })
            .collect();

        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };
                let content: Vec<Value> = m.content.iter().map(content_block).collect();
                json!({ "role": role, "content": content })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.options.max_tokens,
            "messages": messages,
        });

        if !system.is_empty() {
            body["system"] = Value::String(system.join("\n\n"));
        }
        if let Some(temp) = request.options.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }

        body
    }
}

/// Our unified content blocks serialize with an `output` field for tool
/// results; the messages API wants `content`.
fn content_block(content: &Content) -> Value {
    match content {
        Content::Text { text } => json!({ "type": "text", "text": text }),
        Content::ToolUse { id, name, input } => {
            json!({ "type": "tool_use", "id": id, "name": name, "input": input })
        }
        Content::ToolResult {
            tool_use_id,
            output,
            is_error,
        } => {
            let mut block = json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": output.as_str().map(str::to_string)
                    .unwrap_or_else(|| output.to_string()),
            });
            if is_error.unwrap_or(false) {
                block["is_error"] = json!(true);
            }
            block
        }
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.build_body(&request);

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("completion request failed")?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .context("completion response was not JSON")?;

        if !status.is_success() {
            let message = payload
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown provider error");
            return Err(anyhow!("provider returned {}: {}", status, message));
        }

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in payload["content"].as_array().into_iter().flatten() {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(t) = block["text"].as_str() {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    tool_calls.push(AiToolCall {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: block["input"].clone(),
                    });
                }
                _ => {}
            }
        }

        let finish_reason = match payload["stop_reason"].as_str() {
            Some("end_turn") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            Some("tool_use") => FinishReason::ToolCalls,
            Some(other) => FinishReason::Other(other.to_string()),
            None => FinishReason::Stop,
        };

        let usage = Usage {
            prompt_tokens: payload
                .pointer("/usage/input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize,
            completion_tokens: payload
                .pointer("/usage/output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize,
            total_tokens: 0,
        };
        let usage = Usage {
            total_tokens: usage.prompt_tokens + usage.completion_tokens,
            ..usage
        };

        Ok(CompletionResponse {
            text,
            tool_calls,
            finish_reason,
            usage,
        })
    }
}
