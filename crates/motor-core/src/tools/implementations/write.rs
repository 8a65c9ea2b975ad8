//! Write tool - Create or overwrite files

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::registry::{parse_params, ErrorCode, Tool, ToolContext, ToolResult};
use crate::tools::security::resolve_safe_write_path;

pub struct WriteTool;

#[derive(Deserialize)]
struct Params {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the workspace. Creates parent directories if needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let path = match resolve_safe_write_path(&ctx.workspace, &ctx.write_roots, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(ErrorCode::PermissionDenied, e, false),
        };

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolResult::error(
                    ErrorCode::ExecutionError,
                    format!("Failed to create directory: {e}"),
                    true,
                );
            }
        }

        match fs::write(&path, &params.content).await {
            Ok(()) => ToolResult::success(format!(
                "Wrote {} lines ({} bytes) to {}",
                params.content.lines().count(),
                params.content.len(),
                params.path
            )),
            Err(e) => ToolResult::error(
                ErrorCode::ExecutionError,
                format!("Failed to write file: {e}"),
                true,
            ),
        }
    }
}
