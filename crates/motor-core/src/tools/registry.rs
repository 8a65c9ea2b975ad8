//! Tool contract and registry
//!
//! Tools are a closed set with a uniform `(args, context) -> result`
//! signature. Arguments are validated against each tool's schema (via serde)
//! before any work happens, never trusted at call sites.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::ai::types::AiTool;
use crate::tools::security::CredentialVault;

/// Default tool execution timeout (2 minutes)
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Closed error-code set at the tool boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Timeout,
    NotFound,
    AuthFailed,
    PermissionDenied,
    InvalidArgs,
    ExecutionError,
    ToolNotAvailable,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Timeout => "timeout",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::InvalidArgs => "invalid_args",
            ErrorCode::ExecutionError => "execution_error",
            ErrorCode::ToolNotAvailable => "tool_not_available",
            ErrorCode::Unknown => "unknown",
        }
    }
}

/// Where a tool result's content came from; downstream consumers treat
/// web-sourced content as less trustworthy than internal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    User,
    Web,
    #[default]
    Internal,
}

/// Tool execution result. Output is always a string; structured data is
/// serialized by the producing tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub retryable: bool,
    pub provenance: Provenance,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
            error_code: None,
            retryable: false,
            provenance: Provenance::Internal,
            duration_ms: 0,
        }
    }

    pub fn success_from(output: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            provenance,
            ..Self::success(output)
        }
    }

    pub fn error(code: ErrorCode, msg: impl std::fmt::Display, retryable: bool) -> Self {
        Self {
            ok: false,
            output: msg.to_string(),
            error_code: Some(code),
            retryable,
            provenance: Provenance::Internal,
            duration_ms: 0,
        }
    }

    pub fn invalid_args(msg: impl std::fmt::Display) -> Self {
        Self::error(ErrorCode::InvalidArgs, msg, false)
    }
}

/// Parse tool parameters, returning a ToolResult error on failure
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolResult> {
    serde_json::from_value(params)
        .map_err(|e| ToolResult::invalid_args(format!("Invalid parameters: {e}")))
}

/// Context for tool execution
#[derive(Clone)]
pub struct ToolContext {
    /// The isolated filesystem root all relative paths resolve under.
    pub workspace: PathBuf,
    /// Subset of the workspace that write tools may touch. Empty means the
    /// whole workspace is writable.
    pub write_roots: Vec<PathBuf>,
    /// Hostnames `fetch` may contact.
    pub allowed_domains: Vec<String>,
    /// Live credential map + redaction set for this run.
    pub vault: Arc<CredentialVault>,
    /// Optional per-call timeout override
    pub timeout: Option<Duration>,
}

impl ToolContext {
    pub fn for_workspace(workspace: PathBuf) -> Self {
        Self {
            workspace,
            write_roots: Vec::new(),
            allowed_domains: Vec::new(),
            vault: Arc::new(CredentialVault::new()),
            timeout: None,
        }
    }

    pub fn with_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_domains = domains;
        self
    }

    pub fn with_vault(mut self, vault: Arc<CredentialVault>) -> Self {
        self.vault = vault;
        self
    }
}

/// Trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (id)
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON schema for parameters
    fn parameters_schema(&self) -> Value;

    /// Execute the tool
    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

/// Registry for the closed tool set.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    default_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().await;
        tools.insert(name, tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    /// Schemas for the subset of registered tools named in `grant`.
    pub async fn schemas_for(&self, grant: &[String]) -> Vec<AiTool> {
        let tools = self.tools.read().await;
        let mut schemas: Vec<AiTool> = grant
            .iter()
            .filter_map(|name| tools.get(name))
            .map(|t| AiTool {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execute a registered tool with a timeout. Returns `None` for an
    /// unknown tool name.
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> Option<ToolResult> {
        let tool = self.get(name).await?;
        let timeout = ctx.timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();

        let mut result = match tokio::time::timeout(timeout, tool.execute(params, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(tool = name, timeout_secs = timeout.as_secs(), "tool timed out");
                ToolResult::error(
                    ErrorCode::Timeout,
                    format!("Tool '{}' timed out after {} seconds", name, timeout.as_secs()),
                    true,
                )
            }
        };

        result.duration_ms = start.elapsed().as_millis() as u64;
        Some(result)
    }
}

/// Tools whose effects cannot be safely replayed after a crash between
/// execution and persistence. The loop checkpoints before dispatching these.
pub fn is_idempotent(tool: &str) -> bool {
    matches!(tool, "read" | "list" | "glob" | "grep" | "fetch")
}
