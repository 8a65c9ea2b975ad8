//! In-process container runtime (host target)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ContainerHandle, ContainerRuntime, ContainerSpec, ToolRequest, ToolResponse};
use crate::tools::registry::{ErrorCode, ToolContext, ToolRegistry, ToolResult};
use crate::tools::security::CredentialVault;

/// Runs tools in-process against the run's workspace directory. Isolation is
/// whatever the path/domain checks provide; use a real container runtime when
/// the host must be protected from the sandboxed process itself.
pub struct LocalRuntime {
    registry: Arc<ToolRegistry>,
    handles: Mutex<HashMap<String, (Arc<LocalHandle>, Instant)>>,
}

impl LocalRuntime {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            handles: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for LocalRuntime {
    async fn create(&self, run_id: &str, spec: ContainerSpec) -> Result<Arc<dyn ContainerHandle>> {
        let handle = Arc::new(LocalHandle {
            id: format!("local-{run_id}"),
            registry: self.registry.clone(),
            spec,
            vault: Arc::new(CredentialVault::new()),
        });
        self.handles
            .lock()
            .insert(run_id.to_string(), (handle.clone(), Instant::now()));
        Ok(handle)
    }

    async fn destroy(&self, run_id: &str) -> Result<()> {
        self.handles.lock().remove(run_id);
        Ok(())
    }

    async fn prune(&self, max_age: Duration) -> Result<usize> {
        let mut handles = self.handles.lock();
        let before = handles.len();
        handles.retain(|_, (_, created)| created.elapsed() < max_age);
        Ok(before - handles.len())
    }

    fn is_available(&self) -> bool {
        true
    }
}

struct LocalHandle {
    id: String,
    registry: Arc<ToolRegistry>,
    spec: ContainerSpec,
    vault: Arc<CredentialVault>,
}

#[async_trait]
impl ContainerHandle for LocalHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, request: ToolRequest) -> Result<ToolResponse> {
        let mut ctx = ToolContext::for_workspace(self.spec.workspace.clone())
            .with_domains(self.spec.allowed_domains.clone())
            .with_vault(self.vault.clone());
        ctx.timeout = request.timeout_ms.map(Duration::from_millis);

        let result = self
            .registry
            .execute(&request.tool, request.arguments, &ctx)
            .await
            .unwrap_or_else(|| {
                ToolResult::error(
                    ErrorCode::ToolNotAvailable,
                    format!("Unknown tool: {}", request.tool),
                    false,
                )
            });
        Ok(result.into())
    }

    async fn deliver_credential(&self, key: &str, value: &str) -> Result<()> {
        self.vault.insert(key, value);
        Ok(())
    }
}
