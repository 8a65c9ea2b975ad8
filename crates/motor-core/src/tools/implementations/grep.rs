//! Grep tool - Regex search across workspace files

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tools::governor::SPILL_DIR;
use crate::tools::registry::{parse_params, ErrorCode, Tool, ToolContext, ToolResult};
use crate::tools::security::resolve_safe_path;

const MAX_MATCHES: usize = 200;
const MAX_FILE_BYTES: u64 = 4 * 1024 * 1024;

pub struct GrepTool;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    glob: Option<String>,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regex. Returns path:line: matches."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Workspace-relative directory to search in (defaults to the root)"
                },
                "glob": {
                    "type": "string",
                    "description": "Only search files whose name matches this glob, e.g. '*.rs'"
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

        let re = match regex::Regex::new(&params.pattern) {
            Ok(re) => re,
            Err(e) => {
                return ToolResult::error(
                    ErrorCode::InvalidArgs,
                    format!("Invalid regex: {e}"),
                    false,
                )
            }
        };

        let name_filter = match params.glob.as_deref().map(glob::Pattern::new) {
            None => None,
            Some(Ok(p)) => Some(p),
            Some(Err(e)) => {
                return ToolResult::error(
                    ErrorCode::InvalidArgs,
                    format!("Invalid glob filter: {e}"),
                    false,
                )
            }
        };

        let root = match resolve_safe_path(&ctx.workspace, params.path.as_deref().unwrap_or(".")) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(ErrorCode::PermissionDenied, e, false),
        };

        let mut matches = Vec::new();
        'files: for entry in WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
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
            if let Some(ref filter) = name_filter {
                let name = entry.file_name().to_string_lossy();
                if !filter.matches(&name) {
                    continue;
                }
            }
            if entry.metadata().map(|m| m.len()).unwrap_or(0) > MAX_FILE_BYTES {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue; // binary or unreadable
            };
            for (idx, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(format!("{}:{}: {}", rel, idx + 1, line.trim_end()));
                    if matches.len() >= MAX_MATCHES {
                        matches.push(format!("[... truncated at {MAX_MATCHES} matches ...]"));
                        break 'files;
                    }
                }
            }
        }

        if matches.is_empty() {
            return ToolResult::success(format!("No matches for pattern: {}", params.pattern));
        }
        ToolResult::success(matches.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn finds_lines_with_locations() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}\nlet x = 1;").unwrap();
        std::fs::write(dir.path().join("b.txt"), "fn not_rust() {}").unwrap();
        let ctx = ToolContext::for_workspace(dir.path().to_path_buf());

        let result = GrepTool
            .execute(json!({"pattern": "fn \\w+", "glob": "*.rs"}), &ctx)
            .await;
        assert!(result.ok);
        assert!(result.output.contains("a.rs:1: fn main() {}"));
        assert!(!result.output.contains("b.txt"));
    }
}
