//! The attempt loop
//!
//! Drives one attempt through iterations: call the model, execute the single
//! returned tool call, persist, repeat, until completion, a pause, or
//! failure. State is persisted after every iteration so a crash loses at
//! most one in-flight step.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ai::client::{CallOptions, CompletionClient, CompletionRequest};
use crate::ai::types::{AiToolCall, Content, ModelMessage, Role};
use crate::container::{ContainerHandle, ContainerRuntime, ContainerSpec, ToolRequest};
use crate::storage::RunStore;
use crate::tools::governor::OutputGovernor;
use crate::tools::registry::{is_idempotent, ErrorCode, ToolRegistry, ToolResult};
use crate::tools::security::{
    extract_blocked_domain, resolve_call_arguments, valid_credential_name, CredentialVault,
};
use crate::tools::synthetic::{ASK_USER, REQUEST_APPROVAL, SAVE_CREDENTIAL};

use super::failure::{
    self, build_summary, FailureStreak, CONSECUTIVE_FAILURE_THRESHOLD,
};
use super::history::{looks_like_tool_markup, sanitize_messages};
use super::types::{
    AttemptStatus, FailureCategory, FailureSummary, Run, RunStatus, TraceEntry,
};

/// Everything one loop invocation needs. The container handle slot is shared
/// with the manager so an environment created here survives a pause.
pub struct LoopContext {
    pub client: Arc<dyn CompletionClient>,
    pub registry: Arc<ToolRegistry>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub handle_slot: Arc<Mutex<Option<Arc<dyn ContainerHandle>>>>,
    pub runs: RunStore,
    pub vault: Arc<CredentialVault>,
    pub governor: OutputGovernor,
    pub cancel: CancellationToken,
    pub max_tokens: u32,
}

/// How one loop invocation ended.
#[derive(Debug)]
pub enum LoopOutcome {
    Completed { result: String },
    AwaitingInput { question: String },
    AwaitingApproval { action: String },
    Failed { summary: FailureSummary },
    Canceled,
}

/// Drive the run's current attempt until it completes, pauses, or fails.
///
/// Every mutation is persisted before this function returns control, so the
/// caller may emit signals immediately.
pub async fn drive_attempt(ctx: &LoopContext, run_id: &str) -> Result<LoopOutcome> {
    let mut run = ctx.runs.require(run_id)?;

    run.status = RunStatus::Running;
    {
        let attempt = run
            .current_mut()
            .ok_or_else(|| anyhow!("run {run_id} has no current attempt"))?;
        attempt.status = AttemptStatus::Running;
        attempt.clear_pending();
    }
    ctx.runs.save(&run)?;

    // Credentials captured before a pause or restart come back into the live
    // vault so placeholder resolution and redaction keep working.
    for (name, value) in &run.pending_credentials {
        ctx.vault.insert(name, value);
    }

    let grant = run.tools.clone();
    let schema_names = schema_names(&run);
    let tools = ctx.registry.schemas_for(&schema_names).await;

    let mut streak = FailureStreak::default();
    let mut prior_tool_errors = run
        .current()
        .map(|a| a.trace.iter().any(|t| !t.ok))
        .unwrap_or(false);

    loop {
        // (a) Cancellation fires between iterations, never mid-persist.
        if ctx.cancel.is_cancelled() {
            info!(run_id, "loop observed cancellation");
            return Ok(LoopOutcome::Canceled);
        }

        let attempt = run.current().expect("attempt checked above");
        if attempt.step_cursor >= attempt.max_iterations {
            let summary = build_summary(
                FailureCategory::BudgetExhausted,
                attempt,
                None,
                Some(format!(
                    "The task did not finish within {} iterations.",
                    attempt.max_iterations
                )),
            );
            return fail_attempt(ctx, &mut run, summary);
        }

        // (b) Every prior tool call must have exactly one result.
        let sanitized = sanitize_messages(&run.current().expect("attempt").messages);
        run.current_mut().expect("attempt").messages = sanitized;

        // (c) Single tool call per iteration, enforced below regardless of
        // what the provider does with the request.
        let request = CompletionRequest {
            messages: run.current().expect("attempt").messages.clone(),
            tools: tools.clone(),
            options: CallOptions {
                max_tokens: ctx.max_tokens,
                temperature: None,
                max_tool_calls: Some(1),
            },
        };

        let response = match ctx.client.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                let message = format!("{e:#}");
                warn!(run_id, "completion call failed: {message}");
                let category = failure::classify_loop_error(&message);
                let attempt = run.current().expect("attempt");
                let summary = build_summary(category, attempt, None, Some(message));
                return fail_attempt(ctx, &mut run, summary);
            }
        };

        run.energy_consumed += response.usage.total_tokens as f64;

        let mut calls = response.tool_calls;
        if calls.len() > 1 {
            warn!(
                run_id,
                dropped = calls.len() - 1,
                "provider ignored the single-tool-call cap"
            );
            calls.truncate(1);
        }

        let text = ctx.vault.redact(&response.text);
        push_assistant_message(&mut run, &text, &calls);

        // (d) No tool call: done, unless it smells like a failed call.
        if calls.is_empty() {
            if prior_tool_errors && (text.trim().is_empty() || looks_like_tool_markup(&text)) {
                let attempt = run.current().expect("attempt");
                let summary = build_summary(
                    FailureCategory::ModelFailure,
                    attempt,
                    None,
                    Some(
                        "The model stopped producing tool calls after tool errors; its final \
                         message was empty or looked like malformed tool-call markup."
                            .to_string(),
                    ),
                );
                return fail_attempt(ctx, &mut run, summary);
            }
            return complete_attempt(ctx, &mut run, text);
        }

        let call = calls.remove(0);

        // (e) Special cases come before generic dispatch.
        match call.name.as_str() {
            ASK_USER => {
                let question = string_arg(&call.arguments, "question")
                    .unwrap_or_else(|| "The task needs your input to continue.".to_string());
                return pause_attempt(ctx, &mut run, Pause::Input(question), Some(call.id));
            }
            REQUEST_APPROVAL => {
                let action = string_arg(&call.arguments, "action")
                    .unwrap_or_else(|| "The task wants to perform an unspecified action.".to_string());
                return pause_attempt(ctx, &mut run, Pause::Approval(action), Some(call.id));
            }
            SAVE_CREDENTIAL => {
                let result = save_credential(ctx, &mut run, &call).await;
                prior_tool_errors |= !result.ok;
                record_result(&mut run, &call, &result);
                advance_and_persist(ctx, &mut run)?;
                continue;
            }
            _ => {}
        }

        // Generic dispatch.
        let result = if !grant.iter().any(|t| t == &call.name) {
            ToolResult::error(
                ErrorCode::ToolNotAvailable,
                format!("Tool '{}' is not granted to this run", call.name),
                false,
            )
        } else {
            match resolve_call_arguments(&ctx.vault, &call.name, &call.arguments) {
                Err(unresolved) => ToolResult::error(ErrorCode::AuthFailed, unresolved, false),
                Ok(arguments) => {
                    // Non-idempotent tools checkpoint before dispatch: a crash
                    // mid-call resumes with the call recorded as issued rather
                    // than silently replaying it.
                    if !is_idempotent(&call.name) {
                        ctx.runs.save(&run)?;
                    }
                    let dispatched = dispatch(ctx, &mut run, &call.name, arguments).await;
                    match dispatched {
                        Ok(result) => result,
                        Err(e) => {
                            let message = format!("{e:#}");
                            warn!(run_id, tool = %call.name, "dispatch failed: {message}");
                            let attempt = run.current().expect("attempt");
                            let summary = build_summary(
                                failure::classify_loop_error(&message),
                                attempt,
                                Some(ErrorCode::ExecutionError.as_str().to_string()),
                                Some(message),
                            );
                            return fail_attempt(ctx, &mut run, summary);
                        }
                    }
                }
            }
        };

        // Govern, then redact: the spill file keeps raw content, the
        // conversation never sees a credential value.
        let governed = ctx
            .governor
            .govern(&call.name, &call.id, &call.arguments, result, &run.workspace)
            .await?;
        let governed = ToolResult {
            output: ctx.vault.redact(&governed.output),
            ..governed
        };

        prior_tool_errors |= !governed.ok;
        record_result(&mut run, &call, &governed);

        // Consecutive-failure detection.
        if !governed.ok {
            let code = governed
                .error_code
                .map(|c| c.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let count = streak.observe(&call.name, &code, &call.arguments);
            if count >= CONSECUTIVE_FAILURE_THRESHOLD {
                let hint = failure::self_diagnose(&ctx.client, run.current().expect("attempt")).await;
                let attempt = run.current().expect("attempt");
                let summary = build_summary(
                    FailureCategory::ToolFailure,
                    attempt,
                    Some(code),
                    hint,
                );
                return fail_attempt(ctx, &mut run, summary);
            }
        } else {
            streak.reset();
        }

        // Blocked domain: pause for a grant decision without waiting for the
        // model to ask.
        if governed.error_code == Some(ErrorCode::PermissionDenied) {
            if let Some(domain) = extract_blocked_domain(&governed.output) {
                advance_and_persist(ctx, &mut run)?;
                let question = format!(
                    "The task tried to fetch from '{domain}', which is not on this run's \
                     domain allow-list. Should access to {domain} be granted?"
                );
                return pause_attempt(ctx, &mut run, Pause::Input(question), None);
            }
        }

        advance_and_persist(ctx, &mut run)?;
    }
}

// ── Pauses, completion, failure ────────────────────────────────────────

enum Pause {
    Input(String),
    Approval(String),
}

fn pause_attempt(
    ctx: &LoopContext,
    run: &mut Run,
    pause: Pause,
    tool_call_id: Option<String>,
) -> Result<LoopOutcome> {
    let attempt = run.current_mut().expect("attempt");
    attempt.paused_at = Some(Utc::now());
    attempt.pending_tool_call_id = tool_call_id;

    let outcome = match pause {
        Pause::Input(question) => {
            attempt.status = AttemptStatus::AwaitingInput;
            attempt.pending_question = Some(question.clone());
            run.status = RunStatus::AwaitingInput;
            LoopOutcome::AwaitingInput { question }
        }
        Pause::Approval(action) => {
            attempt.status = AttemptStatus::AwaitingApproval;
            attempt.pending_approval = Some(action.clone());
            run.status = RunStatus::AwaitingApproval;
            LoopOutcome::AwaitingApproval { action }
        }
    };

    // The pause is committed only once persisted.
    ctx.runs.save(run)?;
    info!(run_id = %run.id, status = run.status.as_str(), "attempt paused");
    Ok(outcome)
}

fn complete_attempt(ctx: &LoopContext, run: &mut Run, result: String) -> Result<LoopOutcome> {
    let now = Utc::now();
    let attempt = run.current_mut().expect("attempt");
    attempt.status = AttemptStatus::Completed;
    attempt.ended_at = Some(now);
    run.status = RunStatus::Completed;
    run.completed_at = Some(now);
    run.result = Some(result.clone());
    ctx.runs.save(run)?;
    info!(run_id = %run.id, "attempt completed");
    Ok(LoopOutcome::Completed { result })
}

fn fail_attempt(ctx: &LoopContext, run: &mut Run, summary: FailureSummary) -> Result<LoopOutcome> {
    let now = Utc::now();
    let attempt = run.current_mut().expect("attempt");
    attempt.status = AttemptStatus::Failed;
    attempt.failure = Some(summary.clone());
    attempt.ended_at = Some(now);
    run.status = RunStatus::Failed;
    ctx.runs.save(run)?;
    info!(run_id = %run.id, category = ?summary.category, "attempt failed");
    Ok(LoopOutcome::Failed { summary })
}

// ── Iteration plumbing ─────────────────────────────────────────────────

fn schema_names(run: &Run) -> Vec<String> {
    let mut names = run.tools.clone();
    let mut inject = |name: &str| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    };
    if run.config.inject_ask_user {
        inject(ASK_USER);
    }
    if run.config.inject_request_approval {
        inject(REQUEST_APPROVAL);
    }
    if run.config.inject_save_credential {
        inject(SAVE_CREDENTIAL);
    }
    names
}

fn push_assistant_message(run: &mut Run, text: &str, calls: &[AiToolCall]) {
    let mut content = Vec::with_capacity(calls.len() + 1);
    if !text.is_empty() {
        content.push(Content::Text {
            text: text.to_string(),
        });
    }
    for call in calls {
        content.push(Content::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        });
    }
    if content.is_empty() {
        return;
    }
    run.current_mut().expect("attempt").messages.push(ModelMessage {
        role: Role::Assistant,
        content,
    });
}

fn record_result(run: &mut Run, call: &AiToolCall, result: &ToolResult) {
    let attempt = run.current_mut().expect("attempt");
    let excerpt = failure::truncate_utf8(&result.output, 400).to_string();
    attempt.trace.push(TraceEntry {
        iteration: attempt.step_cursor,
        tool: call.name.clone(),
        ok: result.ok,
        error_code: result.error_code.map(|c| c.as_str().to_string()),
        duration_ms: result.duration_ms,
        output_excerpt: excerpt,
    });
    attempt.messages.push(ModelMessage {
        role: Role::User,
        content: vec![Content::ToolResult {
            tool_use_id: call.id.clone(),
            output: Value::String(result.output.clone()),
            is_error: if result.ok { None } else { Some(true) },
        }],
    });
}

fn advance_and_persist(ctx: &LoopContext, run: &mut Run) -> Result<()> {
    let attempt = run.current_mut().expect("attempt");
    attempt.step_cursor += 1;
    debug_assert!(attempt.step_cursor <= attempt.max_iterations);
    ctx.runs.save(run)
}

async fn dispatch(
    ctx: &LoopContext,
    run: &mut Run,
    tool: &str,
    arguments: Value,
) -> Result<ToolResult> {
    let handle = ensure_handle(ctx, run).await?;
    let response = handle
        .execute(ToolRequest {
            tool: tool.to_string(),
            arguments,
            timeout_ms: None,
        })
        .await?;
    Ok(response.into())
}

/// The environment is created lazily on first dispatch and kept alive across
/// pauses so the workspace and installed dependencies survive the round-trip.
async fn ensure_handle(ctx: &LoopContext, run: &mut Run) -> Result<Arc<dyn ContainerHandle>> {
    let mut slot = ctx.handle_slot.lock().await;
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let handle = ctx
        .runtime
        .create(
            &run.id,
            ContainerSpec {
                workspace: run.workspace.clone(),
                allowed_domains: run.allowed_domains.clone(),
                install_dependencies: run.config.install_dependencies,
            },
        )
        .await?;
    run.container_id = Some(handle.id().to_string());
    ctx.runs.save(run)?;

    // Replay any credentials captured before a restart.
    for (name, value) in &run.pending_credentials {
        handle.deliver_credential(name, value).await?;
    }

    *slot = Some(handle.clone());
    debug!(run_id = %run.id, container = handle.id(), "environment created");
    Ok(handle)
}

async fn save_credential(ctx: &LoopContext, run: &mut Run, call: &AiToolCall) -> ToolResult {
    let Some(name) = string_arg(&call.arguments, "name") else {
        return ToolResult::invalid_args("save_credential requires a 'name'");
    };
    let Some(value) = string_arg(&call.arguments, "value") else {
        return ToolResult::invalid_args("save_credential requires a 'value'");
    };

    if !valid_credential_name(&name) {
        // Never echo the value back, even on errors.
        return ToolResult::invalid_args(format!(
            "Invalid credential name '{name}': use letters, digits and underscores only"
        ));
    }
    if let Some(scope) = &run.config.credential_scope {
        if !scope.iter().any(|allowed| allowed == &name) {
            return ToolResult::error(
                ErrorCode::PermissionDenied,
                format!("Credential '{name}' is outside this run's allowed scope"),
                false,
            );
        }
    }

    ctx.vault.insert(&name, &value);
    run.pending_credentials.insert(name.clone(), value.clone());

    if let Some(handle) = ctx.handle_slot.lock().await.as_ref() {
        if let Err(e) = handle.deliver_credential(&name, &value).await {
            warn!(run_id = %run.id, "credential delivery failed: {e:#}");
        }
    }

    // Scrub the recorded tool call so the raw value never persists in the
    // conversation history.
    if let Some(last) = run
        .current_mut()
        .expect("attempt")
        .messages
        .last_mut()
        .filter(|m| m.role == Role::Assistant)
    {
        for content in &mut last.content {
            if let Content::ToolUse { id, input, .. } = content {
                if id == &call.id {
                    *input = json!({ "name": name, "value": format!("<credential:{name}>") });
                }
            }
        }
    }

    ToolResult::success(format!("Stored credential '{name}' for this run."))
}

fn string_arg(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}
