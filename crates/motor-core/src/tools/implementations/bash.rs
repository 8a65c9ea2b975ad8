//! Bash tool - Execute shell commands inside the workspace

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::tools::registry::{parse_params, ErrorCode, Tool, ToolContext, ToolResult};

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_TIMEOUT_SECS: u64 = 600;
const MAX_CAPTURE_BYTES: usize = 512 * 1024;

pub struct BashTool;

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command with the workspace as the working directory. \
         Output is stdout and stderr combined."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (default 60, max 600)"
                },
                "description": {
                    "type": "string",
                    "description": "Short human-readable description of what the command does"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let timeout_secs = params
            .timeout
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        run_shell(&params.command, &ctx.workspace, Duration::from_secs(timeout_secs)).await
    }
}

/// Shared shell runner; also backs `execute_oneshot`.
pub async fn run_shell(
    command: &str,
    working_dir: &std::path::Path,
    timeout: Duration,
) -> ToolResult {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ToolResult::error(
                ErrorCode::ExecutionError,
                format!("Failed to spawn shell: {e}"),
                true,
            )
        }
    };

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain both pipes concurrently so a full stderr buffer cannot stall a
    // process we are still reading stdout from.
    let collect = async {
        let read_out = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout {
                let _ = pipe.take(MAX_CAPTURE_BYTES as u64).read_to_end(&mut buf).await;
            }
            buf
        };
        let read_err = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr {
                let _ = pipe.take(MAX_CAPTURE_BYTES as u64).read_to_end(&mut buf).await;
            }
            buf
        };
        let (out, err) = tokio::join!(read_out, read_err);
        let status = child.wait().await;
        (out, err, status)
    };

    let (out, err, status) = match tokio::time::timeout(timeout, collect).await {
        Ok(done) => done,
        Err(_) => {
            return ToolResult::error(
                ErrorCode::Timeout,
                format!("Command timed out after {} seconds", timeout.as_secs()),
                true,
            );
        }
    };

    let mut output = String::from_utf8_lossy(&out).into_owned();
    let err_text = String::from_utf8_lossy(&err);
    if !err_text.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&err_text);
    }

    match status {
        Ok(status) if status.success() => ToolResult::success(output),
        Ok(status) => {
            let code = status.code().unwrap_or(-1);
            ToolResult::error(
                ErrorCode::ExecutionError,
                format!("Command exited with code {code}\n{output}"),
                true,
            )
        }
        Err(e) => ToolResult::error(
            ErrorCode::ExecutionError,
            format!("Failed to wait for command: {e}"),
            true,
        ),
    }
}
