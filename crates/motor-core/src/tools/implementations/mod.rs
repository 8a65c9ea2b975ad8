//! The built-in tool set

mod bash;
mod fetch;
mod glob;
mod grep;
mod list;
mod patch;
mod read;
mod write;

pub use bash::{run_shell, BashTool};
pub use fetch::FetchTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use list::ListTool;
pub use patch::PatchTool;
pub use read::ReadTool;
pub use write::WriteTool;

use std::sync::Arc;

use crate::tools::registry::ToolRegistry;
use crate::tools::synthetic::{AskUserTool, RequestApprovalTool, SaveCredentialTool};

/// Register every built-in tool, synthetic ones included (schemas only; the
/// loop intercepts synthetic calls before dispatch).
pub async fn register_default_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(ReadTool)).await;
    registry.register(Arc::new(WriteTool)).await;
    registry.register(Arc::new(ListTool)).await;
    registry.register(Arc::new(GlobTool)).await;
    registry.register(Arc::new(BashTool)).await;
    registry.register(Arc::new(GrepTool)).await;
    registry.register(Arc::new(PatchTool)).await;
    registry.register(Arc::new(FetchTool::new())).await;
    registry.register(Arc::new(AskUserTool)).await;
    registry.register(Arc::new(RequestApprovalTool)).await;
    registry.register(Arc::new(SaveCredentialTool)).await;
}
