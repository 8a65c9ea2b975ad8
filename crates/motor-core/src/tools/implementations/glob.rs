//! Glob tool - Pattern-based file matching

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, ErrorCode, Tool, ToolContext, ToolResult};
use crate::tools::security::resolve_safe_path;

const MAX_MATCHES: usize = 500;

pub struct GlobTool;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern, e.g. '**/*.rs'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern to match against file paths"
                },
                "path": {
                    "type": "string",
                    "description": "Workspace-relative directory to search in (defaults to the root)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if params.pattern.starts_with('/') || params.pattern.contains("..") {
            return ToolResult::error(
                ErrorCode::PermissionDenied,
                "Pattern must stay inside the workspace",
                false,
            );
        }

        let base = match resolve_safe_path(
            &ctx.workspace,
            params.path.as_deref().unwrap_or("."),
        ) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(ErrorCode::PermissionDenied, e, false),
        };

        let full_pattern = base.join(&params.pattern).display().to_string();
        let paths = match glob::glob(&full_pattern) {
            Ok(paths) => paths,
            Err(e) => {
                return ToolResult::error(
                    ErrorCode::InvalidArgs,
                    format!("Invalid glob pattern: {e}"),
                    false,
                )
            }
        };

        let mut matches = Vec::new();
        for path in paths.filter_map(Result::ok) {
            // canonicalize-checked containment: glob itself follows the
            // literal pattern, symlinked results could point anywhere.
            let Ok(real) = path.canonicalize() else {
                continue;
            };
            let Ok(workspace_real) = ctx.workspace.canonicalize() else {
                continue;
            };
            if !real.starts_with(&workspace_real) {
                continue;
            }
            let rel = path
                .strip_prefix(&base)
                .unwrap_or(&path)
                .display()
                .to_string();
            matches.push(rel);
            if matches.len() >= MAX_MATCHES {
                matches.push(format!("[... truncated at {MAX_MATCHES} matches ...]"));
                break;
            }
        }

        if matches.is_empty() {
            return ToolResult::success(format!("No files match pattern: {}", params.pattern));
        }
        ToolResult::success(matches.join("\n"))
    }
}
