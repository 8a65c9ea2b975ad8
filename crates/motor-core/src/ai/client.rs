//! Completion client contract
//!
//! The engine treats the LLM call as a black box: one request in, one
//! response out. Providers implement [`CompletionClient`]; the loop never
//! sees transport details.

use anyhow::Result;
use async_trait::async_trait;

use super::types::{AiTool, AiToolCall, FinishReason, ModelMessage, Usage};

/// Per-call options.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// Ask the provider to emit at most this many tool calls per response.
    /// The loop enforces the cap regardless of provider compliance.
    pub max_tool_calls: Option<u32>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: None,
            max_tool_calls: Some(1),
        }
    }
}

/// One completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<AiTool>,
    pub options: CallOptions,
}

/// One completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub tool_calls: Vec<AiToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// Black-box completion contract implemented by providers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}
