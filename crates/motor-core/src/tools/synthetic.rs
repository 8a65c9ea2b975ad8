//! Synthetic tools - ask_user, request_approval, save_credential
//!
//! These are intercepted by the attempt loop before dispatch and never
//! execute here; they exist so their schemas reach the model. Which of them
//! are injected is per-run configuration.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::{ErrorCode, Tool, ToolContext, ToolResult};

/// Names the loop intercepts before generic dispatch.
pub const ASK_USER: &str = "ask_user";
pub const REQUEST_APPROVAL: &str = "request_approval";
pub const SAVE_CREDENTIAL: &str = "save_credential";

pub fn is_synthetic(name: &str) -> bool {
    matches!(name, ASK_USER | REQUEST_APPROVAL | SAVE_CREDENTIAL)
}

fn intercepted(name: &str) -> ToolResult {
    ToolResult::error(
        ErrorCode::ExecutionError,
        format!("'{name}' should be handled by the run loop, not executed directly"),
        false,
    )
}

pub struct AskUserTool;

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        ASK_USER
    }

    fn description(&self) -> &str {
        "Pause the task and ask the user a question. Use only when you cannot \
         proceed without their input; the task stays paused until they answer."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to ask, in plain language"
                }
            },
            "required": ["question"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        intercepted(ASK_USER)
    }
}

pub struct RequestApprovalTool;

#[async_trait]
impl Tool for RequestApprovalTool {
    fn name(&self) -> &str {
        REQUEST_APPROVAL
    }

    fn description(&self) -> &str {
        "Pause the task and ask the user to approve an action before you take \
         it. Describe exactly what will happen if they approve."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "description": "Plain-language description of the action needing approval"
                }
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        intercepted(REQUEST_APPROVAL)
    }
}

pub struct SaveCredentialTool;

#[async_trait]
impl Tool for SaveCredentialTool {
    fn name(&self) -> &str {
        SAVE_CREDENTIAL
    }

    fn description(&self) -> &str {
        "Store a credential the user provided so later tool calls can \
         reference it as <credential:NAME> without exposing the value."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Credential name (alphanumeric and underscores only)"
                },
                "value": {
                    "type": "string",
                    "description": "The secret value to store"
                }
            },
            "required": ["name", "value"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        intercepted(SAVE_CREDENTIAL)
    }
}
