//! Patch tool - Exact-match text replacement

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::registry::{parse_params, ErrorCode, Tool, ToolContext, ToolResult};
use crate::tools::security::resolve_safe_write_path;

pub struct PatchTool;

#[derive(Deserialize)]
struct Params {
    path: String,
    old_text: String,
    new_text: String,
}

#[async_trait]
impl Tool for PatchTool {
    fn name(&self) -> &str {
        "patch"
    }

    fn description(&self) -> &str {
        "Replace an exact text snippet in a file. The snippet must match exactly once."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to the file to patch"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to replace (must appear exactly once)"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if params.old_text.is_empty() {
            return ToolResult::invalid_args("old_text must not be empty");
        }

        let path = match resolve_safe_write_path(&ctx.workspace, &ctx.write_roots, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(ErrorCode::PermissionDenied, e, false),
        };

        if !path.is_file() {
            return ToolResult::error(
                ErrorCode::NotFound,
                format!("File not found: {}", params.path),
                false,
            );
        }

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::error(
                    ErrorCode::ExecutionError,
                    format!("Failed to read file: {e}"),
                    true,
                )
            }
        };

        let occurrences = content.matches(&params.old_text).count();
        if occurrences == 0 {
            return ToolResult::error(
                ErrorCode::InvalidArgs,
                "old_text not found in file; re-read the file and retry with the exact text",
                false,
            );
        }
        if occurrences > 1 {
            return ToolResult::error(
                ErrorCode::InvalidArgs,
                format!(
                    "old_text matches {occurrences} locations; include more surrounding context \
                     to make it unique"
                ),
                false,
            );
        }

        let updated = content.replacen(&params.old_text, &params.new_text, 1);
        match fs::write(&path, &updated).await {
            Ok(()) => ToolResult::success(format!("Patched {}", params.path)),
            Err(e) => ToolResult::error(
                ErrorCode::ExecutionError,
                format!("Failed to write file: {e}"),
                true,
            ),
        }
    }
}
