//! End-to-end run lifecycle tests against a scripted completion client.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use motor_core::ai::client::{CompletionClient, CompletionRequest, CompletionResponse};
use motor_core::ai::types::{AiToolCall, Content, FinishReason, Usage};
use motor_core::config::EngineConfig;
use motor_core::container::LocalRuntime;
use motor_core::run::{
    FailureCategory, ManagerDeps, RunConfig, RunError, RunManager, RunSignal, RunStatus,
    StartOptions,
};
use motor_core::storage::{MemoryStore, RunStore};
use motor_core::tools::implementations::register_default_tools;
use motor_core::tools::ToolRegistry;
use motor_core::run::signals::SignalReceiver;
use motor_core::run::FullEnergy;

// ── Scripted client ────────────────────────────────────────────────────

struct ScriptedClient {
    responses: Mutex<VecDeque<CompletionResponse>>,
}

impl ScriptedClient {
    fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow!("script exhausted"))
    }
}

fn text_response(text: &str) -> CompletionResponse {
    CompletionResponse {
        text: text.to_string(),
        tool_calls: vec![],
        finish_reason: FinishReason::Stop,
        usage: Usage::default(),
    }
}

fn tool_response(id: &str, name: &str, arguments: serde_json::Value) -> CompletionResponse {
    CompletionResponse {
        text: String::new(),
        tool_calls: vec![AiToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
        finish_reason: FinishReason::ToolCalls,
        usage: Usage::default(),
    }
}

// ── Harness ────────────────────────────────────────────────────────────

struct Harness {
    manager: RunManager,
    signals: SignalReceiver,
    store: Arc<MemoryStore>,
    _root: TempDir,
}

async fn harness(script: Vec<CompletionResponse>, config: EngineConfig) -> Harness {
    let root = TempDir::new().unwrap();
    let registry = Arc::new(ToolRegistry::new());
    register_default_tools(&registry).await;
    let store = Arc::new(MemoryStore::new());

    let (manager, signals) = RunManager::new(ManagerDeps {
        client: Arc::new(ScriptedClient::new(script)),
        registry: registry.clone(),
        runtime: Arc::new(LocalRuntime::new(registry)),
        store: store.clone(),
        energy: Arc::new(FullEnergy),
        config,
        workspaces_root: root.path().join("workspaces"),
        skills_root: root.path().join("skills"),
    });

    Harness {
        manager,
        signals,
        store,
        _root: root,
    }
}

async fn next_signal(signals: &mut SignalReceiver) -> RunSignal {
    tokio::time::timeout(Duration::from_secs(10), signals.recv())
        .await
        .expect("timed out waiting for a signal")
        .expect("signal channel closed")
}

fn start_options(task: &str, tools: &[&str]) -> StartOptions {
    StartOptions {
        task: task.to_string(),
        tools: tools.iter().map(|t| t.to_string()).collect(),
        max_iterations: None,
        skill: None,
        domains: vec![],
        config: RunConfig::default(),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn simple_task_runs_to_completion() {
    let mut h = harness(
        vec![
            tool_response("c1", "bash", json!({"command": "echo hello"})),
            text_response("Echoed hello successfully."),
        ],
        EngineConfig::default(),
    )
    .await;

    let started = h
        .manager
        .start_run(start_options("echo something", &["bash"]))
        .await
        .unwrap();
    assert_eq!(started.status, RunStatus::Created);

    let signal = next_signal(&mut h.signals).await;
    let RunSignal::Completed { run_id, result, .. } = signal else {
        panic!("expected completion, got {signal:?}");
    };
    assert_eq!(run_id, started.run_id);
    assert_eq!(result, "Echoed hello successfully.");

    let run = h.manager.get_run_status(&run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.completed_at.is_some());
    let attempt = run.current().unwrap();
    assert!(attempt.trace.iter().all(|t| t.ok));
    assert!(attempt.step_cursor <= attempt.max_iterations);

    // The mutex is released: a new run can start.
    let runs = RunStore::new(h.store.clone());
    assert!(runs.active_run_id().unwrap().is_none());
}

#[tokio::test]
async fn only_one_run_may_be_active() {
    let mut h = harness(
        vec![tool_response(
            "c1",
            "ask_user",
            json!({"question": "Which file should I edit?"}),
        )],
        EngineConfig::default(),
    )
    .await;

    let first = h
        .manager
        .start_run(start_options("edit a file", &["read"]))
        .await
        .unwrap();

    // Wait until the first run has committed its pause and holds the slot.
    let signal = next_signal(&mut h.signals).await;
    assert!(matches!(signal, RunSignal::AwaitingInput { .. }));

    let second = h
        .manager
        .start_run(start_options("another task", &["read"]))
        .await;
    assert!(matches!(second, Err(RunError::AlreadyActive)));

    let run = h.manager.get_run_status(&first.run_id).unwrap();
    assert_eq!(run.status, RunStatus::AwaitingInput);
    assert_eq!(
        run.current().unwrap().pending_question.as_deref(),
        Some("Which file should I edit?")
    );
}

#[tokio::test]
async fn ask_user_pause_pairs_answer_with_the_tool_call() {
    let mut h = harness(
        vec![
            tool_response("ask-1", "ask_user", json!({"question": "Proceed?"})),
            text_response("Done after confirmation."),
        ],
        EngineConfig::default(),
    )
    .await;

    let started = h
        .manager
        .start_run(start_options("needs input", &["read"]))
        .await
        .unwrap();
    let signal = next_signal(&mut h.signals).await;
    let RunSignal::AwaitingInput { question, .. } = signal else {
        panic!("expected pause, got {signal:?}");
    };
    assert_eq!(question, "Proceed?");

    let change = h
        .manager
        .respond_to_run(&started.run_id, "yes, go ahead", vec![])
        .await
        .unwrap();
    assert_eq!(change.previous_status, RunStatus::AwaitingInput);
    assert_eq!(change.new_status, RunStatus::Running);

    let signal = next_signal(&mut h.signals).await;
    assert!(matches!(signal, RunSignal::Completed { .. }));

    // The paused tool call and the acknowledgement stay paired.
    let run = h.manager.get_run_status(&started.run_id).unwrap();
    let messages = &run.current().unwrap().messages;
    let paired = messages.iter().any(|m| {
        m.content.iter().any(|c| {
            matches!(
                c,
                Content::ToolResult { tool_use_id, output, .. }
                    if tool_use_id == "ask-1"
                        && output.as_str().unwrap_or("").contains("yes, go ahead")
            )
        })
    });
    assert!(paired, "answer was not recorded against the paused call");
}

#[tokio::test]
async fn blocked_domain_auto_pauses_and_grant_resumes() {
    let mut h = harness(
        vec![
            tool_response("f1", "fetch", json!({"url": "https://blocked.example/data"})),
            text_response("Finished without the fetch."),
        ],
        EngineConfig::default(),
    )
    .await;

    let mut opts = start_options("fetch something", &["fetch"]);
    opts.domains = vec!["good.example".to_string()];
    let started = h.manager.start_run(opts).await.unwrap();

    // The loop pauses on the blocked-domain signature without the model
    // calling ask_user.
    let signal = next_signal(&mut h.signals).await;
    let RunSignal::AwaitingInput { question, .. } = signal else {
        panic!("expected auto-pause, got {signal:?}");
    };
    assert!(question.contains("blocked.example"));

    let run = h.manager.get_run_status(&started.run_id).unwrap();
    assert_eq!(run.status, RunStatus::AwaitingInput);
    // The fetch call already has its BLOCKED result; the pause is synthetic.
    assert!(run.current().unwrap().pending_tool_call_id.is_none());
    let blocked_recorded = run.current().unwrap().messages.iter().any(|m| {
        m.content.iter().any(|c| {
            matches!(
                c,
                Content::ToolResult { output, .. }
                    if output.as_str().unwrap_or("").starts_with("BLOCKED: Domain blocked.example")
            )
        })
    });
    assert!(blocked_recorded);

    h.manager
        .respond_to_run(&started.run_id, "granted", vec!["blocked.example".to_string()])
        .await
        .unwrap();
    let signal = next_signal(&mut h.signals).await;
    assert!(matches!(signal, RunSignal::Completed { .. }));

    let run = h.manager.get_run_status(&started.run_id).unwrap();
    assert!(run
        .allowed_domains
        .contains(&"blocked.example".to_string()));
}

#[tokio::test]
async fn resolved_credentials_never_reach_the_transcript() {
    let mut h = harness(
        vec![
            tool_response(
                "s1",
                "save_credential",
                json!({"name": "API_KEY", "value": "sk-abc123456"}),
            ),
            tool_response("b1", "bash", json!({"command": "echo token=${API_KEY}"})),
            text_response("Used the credential."),
        ],
        EngineConfig::default(),
    )
    .await;

    let mut opts = start_options("use a secret", &["bash"]);
    opts.config.inject_save_credential = true;
    opts.config.credential_scope = Some(vec!["API_KEY".to_string()]);
    let started = h.manager.start_run(opts).await.unwrap();

    let signal = next_signal(&mut h.signals).await;
    assert!(matches!(signal, RunSignal::Completed { .. }));

    let run = h.manager.get_run_status(&started.run_id).unwrap();
    let transcript = serde_json::to_string(&run.current().unwrap().messages).unwrap();
    assert!(
        !transcript.contains("sk-abc123456"),
        "raw credential value leaked into the transcript"
    );
    // The echoed value was resolved, then redacted back to placeholder form.
    assert!(transcript.contains("<credential:API_KEY>"));
    assert!(run.pending_credentials.contains_key("API_KEY"));
}

#[tokio::test]
async fn three_identical_failures_fail_the_attempt() {
    let call = |i: usize| tool_response(&format!("r{i}"), "read", json!({"path": "missing.txt"}));
    let mut h = harness(
        vec![call(1), call(2), call(3)],
        EngineConfig {
            max_attempts: 1,
            ..EngineConfig::default()
        },
    )
    .await;

    let started = h
        .manager
        .start_run(start_options("read a file", &["read"]))
        .await
        .unwrap();

    let signal = next_signal(&mut h.signals).await;
    let RunSignal::Failed { failure, .. } = signal else {
        panic!("expected failure, got {signal:?}");
    };
    assert_eq!(failure.category, FailureCategory::ToolFailure);
    assert_eq!(failure.last_error_code.as_deref(), Some("not_found"));
    assert!(failure.retryable);
    assert!(!failure.recent_results.is_empty());

    let run = h.manager.get_run_status(&started.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn success_resets_the_failure_streak() {
    let mut h = harness(
        vec![
            tool_response("r1", "read", json!({"path": "missing.txt"})),
            tool_response("r2", "read", json!({"path": "missing.txt"})),
            // Recovery: create the file, read it, finish.
            tool_response("b1", "bash", json!({"command": "echo found > missing.txt"})),
            tool_response("r3", "read", json!({"path": "missing.txt"})),
            text_response("Recovered and finished."),
        ],
        EngineConfig {
            max_attempts: 1,
            ..EngineConfig::default()
        },
    )
    .await;

    h.manager
        .start_run(start_options("read with recovery", &["read", "bash"]))
        .await
        .unwrap();

    let signal = next_signal(&mut h.signals).await;
    assert!(
        matches!(signal, RunSignal::Completed { .. }),
        "two failures then success must not trip the threshold: {signal:?}"
    );
}

#[tokio::test]
async fn iteration_budget_exhaustion_is_not_retryable() {
    let call = |i: usize| tool_response(&format!("c{i}"), "list", json!({}));
    let mut h = harness(
        vec![call(1), call(2), call(3)],
        EngineConfig {
            max_attempts: 3,
            ..EngineConfig::default()
        },
    )
    .await;

    let mut opts = start_options("never finishes", &["list"]);
    opts.max_iterations = Some(2);
    h.manager.start_run(opts).await.unwrap();

    let signal = next_signal(&mut h.signals).await;
    let RunSignal::Failed { failure, .. } = signal else {
        panic!("expected failure, got {signal:?}");
    };
    assert_eq!(failure.category, FailureCategory::BudgetExhausted);
    assert!(!failure.retryable, "budget exhaustion is never auto-retried");
}

#[tokio::test]
async fn retryable_failure_spawns_a_fresh_attempt() {
    let fail = |i: usize| tool_response(&format!("r{i}"), "read", json!({"path": "missing.txt"}));
    let mut h = harness(
        vec![
            // Attempt 0: three identical failures.
            fail(1),
            fail(2),
            fail(3),
            // Self-diagnosis call.
            text_response("The file does not exist; create it first."),
            // Attempt 1: success.
            text_response("Second attempt succeeded."),
        ],
        EngineConfig {
            max_attempts: 2,
            ..EngineConfig::default()
        },
    )
    .await;

    let started = h
        .manager
        .start_run(start_options("retryable task", &["read"]))
        .await
        .unwrap();

    let signal = next_signal(&mut h.signals).await;
    let RunSignal::Completed { attempt_index, .. } = signal else {
        panic!("expected completion after auto-retry, got {signal:?}");
    };
    assert_eq!(attempt_index, 1);

    let run = h.manager.get_run_status(&started.run_id).unwrap();
    assert_eq!(run.attempts.len(), 2);
    assert_eq!(run.current_attempt, 1);

    // Fresh history, supervisor-attributed guidance, never user-attributed.
    let retry = &run.attempts[1];
    assert!(retry.recovery.is_some());
    let opening = serde_json::to_string(&retry.messages).unwrap();
    assert!(opening.contains("supervising policy layer"));
    assert!(opening.contains("create it first"));

    // The failed attempt's record is untouched history.
    assert_eq!(run.attempts[0].id, "att_0");
    assert!(run.attempts[0].failure.is_some());
}

#[tokio::test]
async fn approval_flow_approve_and_deny() {
    // Approve path.
    let mut h = harness(
        vec![
            tool_response("a1", "request_approval", json!({"action": "Delete build artifacts"})),
            text_response("Deleted after approval."),
        ],
        EngineConfig::default(),
    )
    .await;
    let started = h
        .manager
        .start_run(start_options("cleanup", &["bash"]))
        .await
        .unwrap();

    let signal = next_signal(&mut h.signals).await;
    let RunSignal::AwaitingApproval { action, .. } = signal else {
        panic!("expected approval pause, got {signal:?}");
    };
    assert_eq!(action, "Delete build artifacts");

    let change = h
        .manager
        .respond_to_approval(&started.run_id, true)
        .await
        .unwrap();
    assert_eq!(change.new_status, RunStatus::Running);
    let signal = next_signal(&mut h.signals).await;
    assert!(matches!(signal, RunSignal::Completed { .. }));

    // Deny path.
    let mut h = harness(
        vec![tool_response(
            "a1",
            "request_approval",
            json!({"action": "Delete everything"}),
        )],
        EngineConfig::default(),
    )
    .await;
    let started = h
        .manager
        .start_run(start_options("cleanup", &["bash"]))
        .await
        .unwrap();
    let _ = next_signal(&mut h.signals).await;

    let change = h
        .manager
        .respond_to_approval(&started.run_id, false)
        .await
        .unwrap();
    assert_eq!(change.new_status, RunStatus::Failed);

    let signal = next_signal(&mut h.signals).await;
    let RunSignal::Failed { failure, .. } = signal else {
        panic!("expected failure after denial, got {signal:?}");
    };
    assert!(failure.hint.unwrap().contains("denied"));
}

#[tokio::test]
async fn cancel_force_fails_without_a_signal() {
    let mut h = harness(
        vec![tool_response("c1", "ask_user", json!({"question": "?"}))],
        EngineConfig::default(),
    )
    .await;
    let started = h
        .manager
        .start_run(start_options("cancelable", &["read"]))
        .await
        .unwrap();
    let _ = next_signal(&mut h.signals).await;

    let change = h.manager.cancel_run(&started.run_id).await.unwrap();
    assert_eq!(change.previous_status, RunStatus::AwaitingInput);
    assert_eq!(change.new_status, RunStatus::Failed);

    // No further signal arrives for a cancel.
    let quiet = tokio::time::timeout(Duration::from_millis(300), h.signals.recv()).await;
    assert!(quiet.is_err(), "cancel must not emit its own signal");

    // Canceling again is an invalid state transition.
    assert!(matches!(
        h.manager.cancel_run(&started.run_id).await,
        Err(RunError::InvalidState { .. })
    ));

    // And the slot is free for the next run.
    let runs = RunStore::new(h.store.clone());
    assert!(runs.active_run_id().unwrap().is_none());
}

#[tokio::test]
async fn restart_fails_stale_runs_and_resumes_progressed_ones() {
    use chrono::{Duration as ChronoDuration, Utc};

    let mut h = harness(
        // Script for the resumed run: it finishes immediately.
        vec![text_response("Resumed and finished.")],
        EngineConfig::default(),
    )
    .await;
    let runs = RunStore::new(h.store.clone());

    // A run that never progressed, started long ago: stale.
    let stale = {
        let mut opts = start_options("went stale", &["read"]);
        opts.max_iterations = Some(5);
        make_run("run_stale", &opts, 0)
    };
    let mut stale_run = stale;
    stale_run.started_at = Utc::now() - ChronoDuration::minutes(10);
    runs.save(&stale_run).unwrap();

    // A run with real progress: resumed.
    let mut progressed = make_run("run_progressed", &start_options("resumes", &["read"]), 1);
    progressed.started_at = Utc::now() - ChronoDuration::minutes(10);
    runs.save(&progressed).unwrap();

    let report = h.manager.recover_on_restart().await.unwrap();
    assert_eq!(report.failed, vec!["run_stale".to_string()]);
    assert_eq!(report.resumed, vec!["run_progressed".to_string()]);

    // Two signals arrive in no guaranteed order: the stale failure and the
    // resumed run's completion.
    let mut saw_stale = false;
    let mut saw_resumed = false;
    for _ in 0..2 {
        match next_signal(&mut h.signals).await {
            RunSignal::Failed { run_id, failure, .. } => {
                assert_eq!(run_id, "run_stale");
                assert!(failure.hint.unwrap().contains("stale"));
                saw_stale = true;
            }
            RunSignal::Completed { run_id, .. } => {
                assert_eq!(run_id, "run_progressed");
                saw_resumed = true;
            }
            other => panic!("unexpected signal: {other:?}"),
        }
    }
    assert!(saw_stale && saw_resumed);
}

/// Build a persisted run record the way the manager would, with a given
/// step cursor, for restart tests.
fn make_run(id: &str, opts: &StartOptions, step_cursor: usize) -> motor_core::run::Run {
    use motor_core::run::history::seed_messages;
    use motor_core::run::{Attempt, Run};

    let mut attempt = Attempt::new(0, seed_messages(&opts.task, None), 10);
    attempt.step_cursor = step_cursor;
    Run {
        id: id.to_string(),
        status: RunStatus::Running,
        task: opts.task.clone(),
        tools: opts.tools.clone(),
        attempts: vec![attempt],
        current_attempt: 0,
        max_attempts: 3,
        started_at: chrono::Utc::now(),
        completed_at: None,
        energy_consumed: 0.0,
        container_id: None,
        workspace: std::env::temp_dir().join(format!("motor-test-{id}")),
        allowed_domains: vec![],
        pending_credentials: Default::default(),
        config: RunConfig::default(),
        result: None,
        skill: None,
        baseline: None,
    }
}

#[tokio::test]
async fn oneshot_needs_no_run_bookkeeping() {
    let mut h = harness(vec![], EngineConfig::default()).await;

    let result = h
        .manager
        .execute_oneshot("echo $((40 + 2))", Some(5_000))
        .await
        .unwrap();
    assert!(result.ok);
    assert_eq!(result.output.trim(), "42");

    // No run record, no active slot, no signal.
    assert!(h.manager.list_runs(Default::default()).unwrap().is_empty());
    let quiet = tokio::time::timeout(Duration::from_millis(100), h.signals.recv()).await;
    assert!(quiet.is_err());
}
