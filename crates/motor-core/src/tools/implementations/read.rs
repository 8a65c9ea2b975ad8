//! Read tool - Read file contents

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::registry::{ErrorCode, Tool, ToolContext, ToolResult};
use crate::tools::registry::parse_params;
use crate::tools::security::resolve_safe_path;

pub struct ReadTool;

#[derive(Deserialize)]
struct Params {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read file contents from the workspace. Supports line offset/limit for large files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to the file to read"
                },
                "offset": {
                    "type": "number",
                    "description": "The line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "number",
                    "description": "The number of lines to read"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let path = match resolve_safe_path(&ctx.workspace, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(ErrorCode::PermissionDenied, e, false),
        };

        if !path.exists() {
            return ToolResult::error(
                ErrorCode::NotFound,
                format!("File not found: {}", params.path),
                false,
            );
        }
        if !path.is_file() {
            return ToolResult::error(
                ErrorCode::InvalidArgs,
                format!("Path is not a file: {}", params.path),
                false,
            );
        }

        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) => {
                return ToolResult::error(
                    ErrorCode::ExecutionError,
                    format!("Failed to read file: {e}"),
                    true,
                )
            }
        };

        // Binary detection: NUL byte in the first 8 KiB.
        let check_len = bytes.len().min(8192);
        if bytes[..check_len].contains(&0) {
            return ToolResult::success(format!(
                "Binary file: {} ({} bytes)",
                params.path,
                bytes.len()
            ));
        }

        let content = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => {
                return ToolResult::error(
                    ErrorCode::ExecutionError,
                    format!("File is not valid UTF-8: {e}"),
                    false,
                )
            }
        };

        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        let start = params.offset.unwrap_or(1).saturating_sub(1);
        let limit = params.limit.unwrap_or(2000);
        let end = start.saturating_add(limit).min(total);

        if start >= total {
            // Reading an empty file from the top is fine; seeking past the
            // end of real content is the model's mistake.
            if start == 0 {
                return ToolResult::success(String::new());
            }
            return ToolResult::error(
                ErrorCode::InvalidArgs,
                format!("Start line {} is beyond file length ({})", start + 1, total),
                false,
            );
        }

        ToolResult::success(lines[start..end].join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_a_slice() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "a\nb\nc\nd").unwrap();
        let ctx = ToolContext::for_workspace(dir.path().to_path_buf());

        let result = ReadTool
            .execute(json!({"path": "f.txt", "offset": 2, "limit": 2}), &ctx)
            .await;
        assert!(result.ok);
        assert_eq!(result.output, "b\nc");
    }

    #[tokio::test]
    async fn empty_file_reads_as_empty_and_rejects_a_seek() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("empty.txt"), "").unwrap();
        let ctx = ToolContext::for_workspace(dir.path().to_path_buf());

        let result = ReadTool.execute(json!({"path": "empty.txt"}), &ctx).await;
        assert!(result.ok);
        assert_eq!(result.output, "");

        let result = ReadTool
            .execute(json!({"path": "empty.txt", "offset": 10, "limit": 2}), &ctx)
            .await;
        assert!(!result.ok);
        assert_eq!(result.error_code, Some(ErrorCode::InvalidArgs));
        assert!(result.output.contains("beyond file length"));
    }

    #[tokio::test]
    async fn huge_limit_is_clamped_to_the_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "a\nb\nc").unwrap();
        let ctx = ToolContext::for_workspace(dir.path().to_path_buf());

        let result = ReadTool
            .execute(
                json!({"path": "f.txt", "offset": 2, "limit": u64::MAX}),
                &ctx,
            )
            .await;
        assert!(result.ok);
        assert_eq!(result.output, "b\nc");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::for_workspace(dir.path().to_path_buf());

        let result = ReadTool.execute(json!({"path": "nope.txt"}), &ctx).await;
        assert!(!result.ok);
        assert_eq!(result.error_code, Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn traversal_is_denied() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::for_workspace(dir.path().to_path_buf());

        let result = ReadTool
            .execute(json!({"path": "../../etc/passwd"}), &ctx)
            .await;
        assert!(!result.ok);
        assert_eq!(result.error_code, Some(ErrorCode::PermissionDenied));
    }
}
