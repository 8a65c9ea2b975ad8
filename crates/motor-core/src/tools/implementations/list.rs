//! List tool - Directory listings

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tools::governor::SPILL_DIR;
use crate::tools::registry::{parse_params, ErrorCode, Tool, ToolContext, ToolResult};
use crate::tools::security::resolve_safe_path;

const MAX_ENTRIES: usize = 500;

pub struct ListTool;

#[derive(Deserialize)]
struct Params {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    recursive: Option<bool>,
}

#[async_trait]
impl Tool for ListTool {
    fn name(&self) -> &str {
        "list"
    }

    fn description(&self) -> &str {
        "List directory contents. Directories are suffixed with '/'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative directory (defaults to the workspace root)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Recurse into subdirectories (default: false)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let requested = params.path.unwrap_or_else(|| ".".to_string());
        let root = match resolve_safe_path(&ctx.workspace, &requested) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(ErrorCode::PermissionDenied, e, false),
        };

        if !root.is_dir() {
            return ToolResult::error(
                ErrorCode::NotFound,
                format!("Not a directory: {requested}"),
                false,
            );
        }

        let max_depth = if params.recursive.unwrap_or(false) {
            usize::MAX
        } else {
            1
        };

        let mut entries = Vec::new();
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            if rel.starts_with(SPILL_DIR) {
                continue;
            }
            if entry.file_type().is_dir() {
                entries.push(format!("{rel}/"));
            } else {
                entries.push(rel);
            }
            if entries.len() >= MAX_ENTRIES {
                entries.push(format!("[... truncated at {MAX_ENTRIES} entries ...]"));
                break;
            }
        }

        if entries.is_empty() {
            return ToolResult::success("(empty directory)");
        }
        ToolResult::success(entries.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lists_entries_with_dir_suffix() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "y").unwrap();
        let ctx = ToolContext::for_workspace(dir.path().to_path_buf());

        let flat = ListTool.execute(json!({}), &ctx).await;
        assert!(flat.ok);
        assert!(flat.output.contains("a.txt"));
        assert!(flat.output.contains("sub/"));
        assert!(!flat.output.contains("b.txt"));

        let deep = ListTool.execute(json!({"recursive": true}), &ctx).await;
        assert!(deep.output.contains("sub/b.txt"));
    }
}
