//! Container runtime contract
//!
//! The engine coordinates an external isolated environment through this
//! handle contract; it never implements the sandbox itself. [`LocalRuntime`]
//! is the host-target implementation: same contract, tools executed
//! in-process inside the workspace directory.

mod local;

pub use local::LocalRuntime;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::registry::{ErrorCode, Provenance, ToolResult};

/// RPC-style tool dispatch request into the isolated environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Response from the isolated environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub ok: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub retryable: bool,
    #[serde(default)]
    pub provenance: Provenance,
    pub duration_ms: u64,
}

impl From<ToolResult> for ToolResponse {
    fn from(result: ToolResult) -> Self {
        Self {
            ok: result.ok,
            output: result.output,
            error_code: result.error_code,
            retryable: result.retryable,
            provenance: result.provenance,
            duration_ms: result.duration_ms,
        }
    }
}

impl From<ToolResponse> for ToolResult {
    fn from(response: ToolResponse) -> Self {
        Self {
            ok: response.ok,
            output: response.output,
            error_code: response.error_code,
            retryable: response.retryable,
            provenance: response.provenance,
            duration_ms: response.duration_ms,
        }
    }
}

/// What the runtime needs to know to create an environment for a run.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub workspace: PathBuf,
    pub allowed_domains: Vec<String>,
    /// Install workspace-declared dependencies during environment setup.
    /// The local runtime ignores this; container runtimes honor it.
    pub install_dependencies: bool,
}

/// A live isolated environment bound to one run.
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Dispatch one tool call into the environment.
    async fn execute(&self, request: ToolRequest) -> Result<ToolResponse>;

    /// Hand a secret to the environment without it transiting tool output.
    async fn deliver_credential(&self, key: &str, value: &str) -> Result<()>;
}

/// The external container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, run_id: &str, spec: ContainerSpec) -> Result<Arc<dyn ContainerHandle>>;

    async fn destroy(&self, run_id: &str) -> Result<()>;

    /// Remove environments older than `max_age`; returns how many went away.
    async fn prune(&self, max_age: Duration) -> Result<usize>;

    fn is_available(&self) -> bool;
}
