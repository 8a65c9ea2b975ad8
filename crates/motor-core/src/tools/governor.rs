//! Output governor
//!
//! Caps tool-output size returned into the model's context. Overflow is
//! spilled to a workspace file and replaced with a pointer. Successful fetch
//! results are always spilled, regardless of size, so the model follows one
//! uniform copy-from-file workflow instead of sometimes seeing inline web
//! content; fetch errors are always inline so it can see why the call failed.
//!
//! Spilled content gets zero inline preview. Weaker models fabricate
//! "remembered" content instead of re-reading a preview, so none is shown.

use std::path::Path;

use anyhow::Result;
use serde_json::Value;
use tokio::fs;

use super::registry::ToolResult;

/// Workspace-relative directory spilled output lands in.
pub const SPILL_DIR: &str = ".motor-output";

/// Default budget: 2,000 lines and 4 KiB per tool result.
pub const DEFAULT_MAX_LINES: usize = 2_000;
pub const DEFAULT_MAX_BYTES: usize = 4_096;

#[derive(Debug, Clone)]
pub struct OutputGovernor {
    pub max_lines: usize,
    pub max_bytes: usize,
}

impl Default for OutputGovernor {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl OutputGovernor {
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            max_lines,
            max_bytes,
        }
    }

    /// Apply the budget to one tool result, spilling overflow into the
    /// workspace.
    pub async fn govern(
        &self,
        tool: &str,
        call_id: &str,
        arguments: &Value,
        result: ToolResult,
        workspace: &Path,
    ) -> Result<ToolResult> {
        // Fetch errors stay inline no matter what.
        if tool == "fetch" && !result.ok {
            return Ok(result);
        }

        // Re-reading an already-spilled file must not spill again.
        if tool == "read" && reads_spill_file(arguments) {
            return Ok(result);
        }

        let over_budget = result.output.lines().count() > self.max_lines
            || result.output.len() > self.max_bytes;
        let always_spill = tool == "fetch" && result.ok;

        if !always_spill && !over_budget {
            return Ok(result);
        }

        let pointer = self
            .spill(tool, call_id, &result.output, workspace)
            .await?;
        Ok(ToolResult {
            output: pointer,
            ..result
        })
    }

    async fn spill(
        &self,
        tool: &str,
        call_id: &str,
        output: &str,
        workspace: &Path,
    ) -> Result<String> {
        let dir = workspace.join(SPILL_DIR);
        fs::create_dir_all(&dir).await?;

        let file_name = format!("{}-{}.txt", tool, sanitize_id(call_id));
        fs::write(dir.join(&file_name), output).await?;

        let rel = format!("{SPILL_DIR}/{file_name}");
        let lines = output.lines().count();
        Ok(format!(
            "Full output saved to {rel} ({lines} lines, {bytes} bytes).\n\
             Copy it with: cp {rel} <destination>\n\
             Read it in slices with: read(path=\"{rel}\", offset=1, limit=200)",
            bytes = output.len(),
        ))
    }
}

fn reads_spill_file(arguments: &Value) -> bool {
    arguments
        .get("path")
        .and_then(Value::as_str)
        .is_some_and(|p| {
            Path::new(p)
                .components()
                .any(|c| c.as_os_str() == SPILL_DIR)
        })
}

fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        "call".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::{ErrorCode, Provenance};
    use serde_json::json;
    use tempfile::tempdir;

    fn big_output() -> String {
        "x".repeat(8 * 1024)
    }

    #[tokio::test]
    async fn small_output_passes_through() {
        let dir = tempdir().unwrap();
        let governor = OutputGovernor::default();
        let result = ToolResult::success("short");

        let governed = governor
            .govern("read", "c1", &json!({"path": "a.txt"}), result, dir.path())
            .await
            .unwrap();
        assert_eq!(governed.output, "short");
        assert!(!dir.path().join(SPILL_DIR).exists());
    }

    #[tokio::test]
    async fn oversized_read_spills_with_pointer_only() {
        let dir = tempdir().unwrap();
        let governor = OutputGovernor::default();
        let result = ToolResult::success(big_output());

        let governed = governor
            .govern("read", "ab12", &json!({"path": "big.txt"}), result, dir.path())
            .await
            .unwrap();

        let spill = dir.path().join(SPILL_DIR).join("read-ab12.txt");
        assert!(spill.exists());
        // Pointer only: no raw content, exactly three lines.
        assert!(!governed.output.contains("xxxx"));
        assert_eq!(governed.output.lines().count(), 3);
        assert!(governed.output.contains(".motor-output/read-ab12.txt"));
    }

    #[tokio::test]
    async fn rereading_spill_file_is_not_respilled() {
        let dir = tempdir().unwrap();
        let governor = OutputGovernor::default();
        let result = ToolResult::success(big_output());

        let governed = governor
            .govern(
                "read",
                "c2",
                &json!({"path": ".motor-output/read-ab12.txt"}),
                result,
                dir.path(),
            )
            .await
            .unwrap();
        assert!(governed.output.contains("xxxx"));
        assert!(!dir.path().join(SPILL_DIR).join("read-c2.txt").exists());
    }

    #[tokio::test]
    async fn fetch_success_always_spills_fetch_error_never_does() {
        let dir = tempdir().unwrap();
        let governor = OutputGovernor::default();

        let ok = ToolResult::success_from("tiny body", Provenance::Web);
        let governed = governor
            .govern("fetch", "f1", &json!({"url": "https://good.example"}), ok, dir.path())
            .await
            .unwrap();
        assert!(governed.output.starts_with("Full output saved to"));
        assert!(dir.path().join(SPILL_DIR).join("fetch-f1.txt").exists());

        let err = ToolResult::error(ErrorCode::ExecutionError, "connection reset", true);
        let governed = governor
            .govern("fetch", "f2", &json!({"url": "https://good.example"}), err, dir.path())
            .await
            .unwrap();
        assert_eq!(governed.output, "connection reset");
    }
}
