//! Fetch tool - HTTP requests gated by the run's domain allow-list

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{
    parse_params, ErrorCode, Provenance, Tool, ToolContext, ToolResult,
};
use crate::tools::security::{blocked_domain_message, domain_allowed};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub struct FetchTool {
    http: reqwest::Client,
}

impl Default for FetchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct Params {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: Option<std::collections::HashMap<String, String>>,
    #[serde(default)]
    body: Option<String>,
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Make an HTTP request to an allowed domain. The response body is saved \
         to a workspace file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch (https recommended)"
                },
                "method": {
                    "type": "string",
                    "description": "HTTP method (default GET)"
                },
                "headers": {
                    "type": "object",
                    "description": "Request headers",
                    "additionalProperties": { "type": "string" }
                },
                "body": {
                    "type": "string",
                    "description": "Request body"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let url = match url::Url::parse(&params.url) {
            Ok(u) => u,
            Err(e) => return ToolResult::invalid_args(format!("Invalid URL: {e}")),
        };
        let Some(host) = url.host_str().map(str::to_string) else {
            return ToolResult::invalid_args("URL has no host");
        };

        if !domain_allowed(&ctx.allowed_domains, &host) {
            return ToolResult::error(
                ErrorCode::PermissionDenied,
                blocked_domain_message(&host),
                false,
            );
        }

        let method = params.method.as_deref().unwrap_or("GET").to_uppercase();
        let method = match reqwest::Method::from_bytes(method.as_bytes()) {
            Ok(m) => m,
            Err(_) => return ToolResult::invalid_args(format!("Invalid method: {method}")),
        };

        let mut request = self.http.request(method, url);
        for (name, value) in params.headers.unwrap_or_default() {
            request = request.header(name, value);
        }
        if let Some(body) = params.body {
            request = request.body(body);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return ToolResult::error(
                    ErrorCode::Timeout,
                    format!("Request timed out: {e}"),
                    true,
                )
            }
            Err(e) => {
                return ToolResult::error(
                    ErrorCode::ExecutionError,
                    format!("Request failed: {e}"),
                    true,
                )
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return ToolResult::error(
                    ErrorCode::ExecutionError,
                    format!("Failed to read response body: {e}"),
                    true,
                )
            }
        };

        let mut body = body;
        if body.len() > MAX_BODY_BYTES {
            body.truncate(MAX_BODY_BYTES);
        }

        if !status.is_success() {
            return ToolResult::error(
                ErrorCode::ExecutionError,
                format!("HTTP {status}\n{body}"),
                status.is_server_error(),
            );
        }

        ToolResult::success_from(format!("HTTP {status}\n{body}"), Provenance::Web)
    }
}
