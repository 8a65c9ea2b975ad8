//! Model communication: message types and the completion contract

mod anthropic;
pub mod client;
pub mod types;

pub use anthropic::AnthropicClient;
pub use client::{CallOptions, CompletionClient, CompletionRequest, CompletionResponse};
