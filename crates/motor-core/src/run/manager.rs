//! Run manager
//!
//! Owns the single-run mutex, energy gating, workspace and container
//! lifecycle, the retry/pause/resume/cancel API, and crash recovery. Every
//! API call returns after persisting; the loop itself runs as a spawned task
//! whose only outputs are persisted state and the signal channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ai::client::CompletionClient;
use crate::ai::types::{Content, ModelMessage, Role};
use crate::config::EngineConfig;
use crate::container::{ContainerHandle, ContainerRuntime};
use crate::run::attempt_loop::{self, LoopContext, LoopOutcome};
use crate::run::history::seed_messages;
use crate::run::signals::{signal_channel, RunSignal, SignalReceiver, SignalSender};
use crate::run::types::{
    Attempt, AttemptStatus, FailureCategory, FailureSummary, NextAction, RecoveryContext, Run,
    RunConfig, RunFilter, RunStatus,
};
use crate::skills::{capture_baseline, SkillHarvester};
use crate::storage::{KeyValueStore, RunStore};
use crate::tools::governor::OutputGovernor;
use crate::tools::implementations::run_shell;
use crate::tools::registry::{ToolRegistry, ToolResult};
use crate::tools::security::CredentialVault;

/// External resource-budget check. The engine only asks "is there enough to
/// start"; replenishment is someone else's concern.
pub trait EnergyGauge: Send + Sync {
    fn available(&self) -> f64;
}

/// Gauge that never refuses.
pub struct FullEnergy;

impl EnergyGauge for FullEnergy {
    fn available(&self) -> f64 {
        f64::MAX
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("another run is already active")]
    AlreadyActive,
    #[error("container runtime is unavailable")]
    RuntimeUnavailable,
    #[error("insufficient energy: {available:.1} available, {required:.1} required")]
    InsufficientEnergy { available: f64, required: f64 },
    #[error("run not found: {0}")]
    NotFound(String),
    #[error("run {run_id} is '{actual}', expected '{expected}'")]
    InvalidState {
        run_id: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("run {0} has exhausted its attempts")]
    AttemptsExhausted(String),
    #[error("the pending approval for run {0} has expired")]
    ApprovalExpired(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Caller-facing parameters for `start_run`.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub task: String,
    pub tools: Vec<String>,
    pub max_iterations: Option<usize>,
    pub skill: Option<String>,
    pub domains: Vec<String>,
    pub config: RunConfig,
}

#[derive(Debug, Clone)]
pub struct StartedRun {
    pub run_id: String,
    pub status: RunStatus,
}

#[derive(Debug, Clone)]
pub struct RetriedRun {
    pub run_id: String,
    pub attempt_index: usize,
    pub status: RunStatus,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub run_id: String,
    pub previous_status: RunStatus,
    pub new_status: RunStatus,
}

/// Everything the manager needs, injected by the host.
pub struct ManagerDeps {
    pub client: Arc<dyn CompletionClient>,
    pub registry: Arc<ToolRegistry>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub store: Arc<dyn KeyValueStore>,
    pub energy: Arc<dyn EnergyGauge>,
    pub config: EngineConfig,
    pub workspaces_root: PathBuf,
    pub skills_root: PathBuf,
}

struct LiveRun {
    cancel: CancellationToken,
    handle_slot: Arc<tokio::sync::Mutex<Option<Arc<dyn ContainerHandle>>>>,
    vault: Arc<CredentialVault>,
}

struct Inner {
    client: Arc<dyn CompletionClient>,
    registry: Arc<ToolRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    runs: RunStore,
    energy: Arc<dyn EnergyGauge>,
    harvester: SkillHarvester,
    config: EngineConfig,
    workspaces_root: PathBuf,
    signals: SignalSender,
    live: Mutex<HashMap<String, Arc<LiveRun>>>,
}

#[derive(Clone)]
pub struct RunManager {
    inner: Arc<Inner>,
}

impl RunManager {
    /// Build a manager and the receiving end of its signal channel.
    pub fn new(deps: ManagerDeps) -> (Self, SignalReceiver) {
        let (signals, receiver) = signal_channel();
        let manager = Self {
            inner: Arc::new(Inner {
                client: deps.client,
                registry: deps.registry,
                runtime: deps.runtime,
                runs: RunStore::new(deps.store),
                energy: deps.energy,
                harvester: SkillHarvester::new(deps.skills_root),
                config: deps.config,
                workspaces_root: deps.workspaces_root,
                signals,
                live: Mutex::new(HashMap::new()),
            }),
        };
        (manager, receiver)
    }

    // ── Run API ────────────────────────────────────────────────────────

    pub async fn start_run(&self, opts: StartOptions) -> Result<StartedRun, RunError> {
        let inner = &self.inner;

        if !inner.runtime.is_available() {
            return Err(RunError::RuntimeUnavailable);
        }
        let available = inner.energy.available();
        if available < inner.config.min_energy {
            return Err(RunError::InsufficientEnergy {
                available,
                required: inner.config.min_energy,
            });
        }

        let run_id = format!("run_{}", uuid::Uuid::new_v4().simple());
        if !inner.runs.try_acquire_active(&run_id)? {
            return Err(RunError::AlreadyActive);
        }

        match self.create_run(&run_id, opts) {
            Ok(()) => {
                self.spawn_loop(&run_id);
                Ok(StartedRun {
                    run_id,
                    status: RunStatus::Created,
                })
            }
            Err(e) => {
                // Undo the claim; nothing was started.
                let _ = inner.runs.release_active(&run_id);
                Err(e.into())
            }
        }
    }

    fn create_run(&self, run_id: &str, opts: StartOptions) -> Result<()> {
        let inner = &self.inner;

        let workspace = inner.workspaces_root.join(run_id);
        std::fs::create_dir_all(&workspace)?;

        let mut domains = opts.domains.clone();
        if let Some(skill) = &opts.skill {
            let installed = inner.harvester.installed_dir(skill);
            if installed.is_dir() {
                crate::skills::harvester::copy_tree(&installed, &workspace)?;
            }
            if opts.config.merge_skill_domains {
                if let Some(policy) = inner.harvester.load_policy(skill)? {
                    domains.extend(policy.allowed_domains);
                }
            }
        }
        domains.sort();
        domains.dedup();

        let baseline = capture_baseline(&workspace)?;
        let max_iterations = opts.max_iterations.unwrap_or(inner.config.max_iterations);
        let attempt = Attempt::new(0, seed_messages(&opts.task, None), max_iterations);

        let run = Run {
            id: run_id.to_string(),
            status: RunStatus::Created,
            task: opts.task,
            tools: opts.tools,
            attempts: vec![attempt],
            current_attempt: 0,
            max_attempts: inner.config.max_attempts,
            started_at: Utc::now(),
            completed_at: None,
            energy_consumed: 0.0,
            container_id: None,
            workspace,
            allowed_domains: domains,
            pending_credentials: HashMap::new(),
            config: opts.config,
            result: None,
            skill: opts.skill,
            baseline: if baseline.is_empty() {
                None
            } else {
                Some(baseline)
            },
        };
        inner.runs.save(&run)?;
        info!(run_id, "run created");
        Ok(())
    }

    pub async fn retry_run(
        &self,
        run_id: &str,
        guidance: &str,
        constraints: Vec<String>,
        domains: Vec<String>,
    ) -> Result<RetriedRun, RunError> {
        let inner = &self.inner;
        let mut run = self.load(run_id)?;

        let last = run
            .attempts
            .last()
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))?;
        if last.status != AttemptStatus::Failed {
            return Err(RunError::InvalidState {
                run_id: run_id.to_string(),
                expected: "failed",
                actual: run.status.as_str(),
            });
        }
        if run.attempts.len() >= run.max_attempts {
            return Err(RunError::AttemptsExhausted(run_id.to_string()));
        }
        // Self-retry of the same run id is exempt from the mutex.
        if !inner.runs.try_acquire_active(run_id)? {
            return Err(RunError::AlreadyActive);
        }

        let mut recovery = RecoveryContext::from_supervisor(&last.id, guidance);
        recovery.constraints = constraints;

        run.allowed_domains.extend(domains);
        run.allowed_domains.sort();
        run.allowed_domains.dedup();

        let index = run.attempts.len();
        let max_iterations = last.max_iterations;
        let mut attempt = Attempt::new(
            index,
            seed_messages(&run.task, Some(&recovery)),
            max_iterations,
        );
        attempt.recovery = Some(recovery);
        run.attempts.push(attempt);
        run.current_attempt = index;
        run.status = RunStatus::Running;
        inner.runs.save(&run)?;

        self.spawn_loop(run_id);
        info!(run_id, attempt = index, "retry started");
        Ok(RetriedRun {
            run_id: run_id.to_string(),
            attempt_index: index,
            status: RunStatus::Running,
        })
    }

    /// Force-fail from any non-terminal state. The loop notices the tripped
    /// token and exits silently; no signal is emitted for a cancel.
    pub async fn cancel_run(&self, run_id: &str) -> Result<StatusChange, RunError> {
        let inner = &self.inner;
        let mut run = self.load(run_id)?;

        if run.status.is_terminal() {
            return Err(RunError::InvalidState {
                run_id: run_id.to_string(),
                expected: "non-terminal",
                actual: run.status.as_str(),
            });
        }
        let previous = run.status;

        if let Some(live) = inner.live.lock().get(run_id) {
            live.cancel.cancel();
        }

        let now = Utc::now();
        if let Some(attempt) = run.current_mut() {
            if !matches!(
                attempt.status,
                AttemptStatus::Completed | AttemptStatus::Failed
            ) {
                attempt.status = AttemptStatus::Failed;
                attempt.ended_at = Some(now);
                attempt.failure = Some(FailureSummary {
                    category: FailureCategory::Unknown,
                    last_error_code: None,
                    retryable: false,
                    next_action: NextAction::Stop,
                    recent_results: Vec::new(),
                    hint: Some("The run was canceled by its caller.".to_string()),
                });
            }
        }
        run.status = RunStatus::Failed;
        inner.runs.save(&run)?;

        self.teardown(run_id).await;
        info!(run_id, "run canceled");
        Ok(StatusChange {
            run_id: run_id.to_string(),
            previous_status: previous,
            new_status: RunStatus::Failed,
        })
    }

    /// Answer a run paused in `awaiting_input` and resume it.
    pub async fn respond_to_run(
        &self,
        run_id: &str,
        answer: &str,
        domains: Vec<String>,
    ) -> Result<StatusChange, RunError> {
        let inner = &self.inner;
        let mut run = self.load(run_id)?;
        if run.status != RunStatus::AwaitingInput {
            return Err(RunError::InvalidState {
                run_id: run_id.to_string(),
                expected: "awaiting_input",
                actual: run.status.as_str(),
            });
        }

        let domains_changed = !domains.is_empty();
        run.allowed_domains.extend(domains);
        run.allowed_domains.sort();
        run.allowed_domains.dedup();

        inject_user_reply(&mut run, &format!("User response: {answer}"));
        run.status = RunStatus::Running;
        inner.runs.save(&run)?;

        // A widened allow-list must reach the environment; recreate it on
        // next dispatch rather than keep one built with the old domains.
        if domains_changed {
            self.reset_environment(run_id).await;
        }

        self.spawn_loop(run_id);
        Ok(StatusChange {
            run_id: run_id.to_string(),
            previous_status: RunStatus::AwaitingInput,
            new_status: RunStatus::Running,
        })
    }

    /// Resolve a pending approval. Approval resumes the run; denial fails it.
    pub async fn respond_to_approval(
        &self,
        run_id: &str,
        approved: bool,
    ) -> Result<StatusChange, RunError> {
        let inner = &self.inner;
        let mut run = self.load(run_id)?;
        if run.status != RunStatus::AwaitingApproval {
            return Err(RunError::InvalidState {
                run_id: run_id.to_string(),
                expected: "awaiting_approval",
                actual: run.status.as_str(),
            });
        }

        let expired = run
            .current()
            .and_then(|a| a.paused_at)
            .is_some_and(|paused| {
                (Utc::now() - paused).num_seconds() > inner.config.approval_timeout_secs as i64
            });
        if expired {
            self.fail_run_in_place(
                &mut run,
                "The approval request expired before a decision arrived.",
            )
            .await?;
            return Err(RunError::ApprovalExpired(run_id.to_string()));
        }

        // The paused tool call and its acknowledgement stay paired either way.
        let reply = if approved {
            "Approved: proceed with the described action."
        } else {
            "Denied: do not perform the described action."
        };
        inject_user_reply(&mut run, reply);

        if approved {
            run.status = RunStatus::Running;
            inner.runs.save(&run)?;
            self.spawn_loop(run_id);
            Ok(StatusChange {
                run_id: run_id.to_string(),
                previous_status: RunStatus::AwaitingApproval,
                new_status: RunStatus::Running,
            })
        } else {
            self.fail_run_in_place(&mut run, "The user denied the requested approval.")
                .await?;
            Ok(StatusChange {
                run_id: run_id.to_string(),
                previous_status: RunStatus::AwaitingApproval,
                new_status: RunStatus::Failed,
            })
        }
    }

    pub fn list_runs(&self, filter: RunFilter) -> Result<Vec<Run>, RunError> {
        Ok(self.inner.runs.list(&filter)?)
    }

    pub fn get_run_status(&self, run_id: &str) -> Result<Run, RunError> {
        self.load(run_id)
    }

    /// Crash recovery: prune stale containers, fail stale or expired runs,
    /// resume the rest.
    pub async fn recover_on_restart(&self) -> Result<RecoveryReport, RunError> {
        let inner = &self.inner;
        let mut report = RecoveryReport::default();

        let pruned = inner
            .runtime
            .prune(Duration::from_secs(inner.config.container_prune_secs))
            .await
            .unwrap_or_else(|e| {
                warn!("container prune failed: {e:#}");
                0
            });
        report.pruned_containers = pruned;

        for mut run in inner.runs.list(&RunFilter::default())? {
            if run.status.is_terminal() {
                continue;
            }
            match run.status {
                RunStatus::AwaitingInput => {
                    // Still waiting on a human; nothing to do.
                }
                RunStatus::AwaitingApproval => {
                    let expired = run
                        .current()
                        .and_then(|a| a.paused_at)
                        .is_some_and(|paused| {
                            (Utc::now() - paused).num_seconds()
                                > inner.config.approval_timeout_secs as i64
                        });
                    if expired {
                        let run_id = run.id.clone();
                        self.fail_run_in_place(
                            &mut run,
                            "The approval request expired while the process was down.",
                        )
                        .await?;
                        report.failed.push(run_id);
                    }
                }
                RunStatus::Created | RunStatus::Running => {
                    let cursor = run.current().map(|a| a.step_cursor).unwrap_or(0);
                    let age = (Utc::now() - run.started_at).num_seconds();
                    if cursor == 0 && age > inner.config.stale_run_secs as i64 {
                        let run_id = run.id.clone();
                        self.fail_run_in_place(
                            &mut run,
                            "This run went stale: it never progressed past its first step \
                             before the process restarted.",
                        )
                        .await?;
                        report.failed.push(run_id);
                    } else {
                        // Mid-flight work: pick it back up. The last tool call
                        // may replay; non-idempotent tools were checkpointed
                        // before dispatch.
                        if !inner.runs.try_acquire_active(&run.id)? {
                            warn!(run_id = %run.id, "active slot held elsewhere; skipping resume");
                            continue;
                        }
                        self.spawn_loop(&run.id);
                        report.resumed.push(run.id.clone());
                    }
                }
                RunStatus::Completed | RunStatus::Failed => unreachable!(),
            }
        }

        info!(
            resumed = report.resumed.len(),
            failed = report.failed.len(),
            pruned = report.pruned_containers,
            "restart recovery finished"
        );
        Ok(report)
    }

    /// Mutex-free single sandbox call with no run/attempt bookkeeping.
    pub async fn execute_oneshot(
        &self,
        code: &str,
        timeout_ms: Option<u64>,
    ) -> Result<ToolResult, RunError> {
        let scratch = self.inner.workspaces_root.join(".oneshot");
        std::fs::create_dir_all(&scratch).map_err(anyhow::Error::from)?;
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(30_000));
        Ok(run_shell(code, &scratch, timeout).await)
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn load(&self, run_id: &str) -> Result<Run, RunError> {
        self.inner
            .runs
            .load(run_id)?
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))
    }

    fn live_entry(&self, run_id: &str) -> Arc<LiveRun> {
        let mut live = self.inner.live.lock();
        live.entry(run_id.to_string())
            .or_insert_with(|| {
                Arc::new(LiveRun {
                    cancel: CancellationToken::new(),
                    handle_slot: Arc::new(tokio::sync::Mutex::new(None)),
                    vault: Arc::new(CredentialVault::new()),
                })
            })
            .clone()
    }

    /// Fire-and-forget: the API call that triggered this returns immediately.
    fn spawn_loop(&self, run_id: &str) {
        let inner = self.inner.clone();
        let manager = self.clone();
        let run_id = run_id.to_string();
        let live = self.live_entry(&run_id);

        tokio::spawn(async move {
            let ctx = LoopContext {
                client: inner.client.clone(),
                registry: inner.registry.clone(),
                runtime: inner.runtime.clone(),
                handle_slot: live.handle_slot.clone(),
                runs: inner.runs.clone(),
                vault: live.vault.clone(),
                governor: OutputGovernor::new(
                    inner.config.output_max_lines,
                    inner.config.output_max_bytes,
                ),
                cancel: live.cancel.clone(),
                max_tokens: inner.config.max_completion_tokens,
            };

            let outcome = attempt_loop::drive_attempt(&ctx, &run_id).await;
            manager.handle_outcome(&run_id, outcome).await;
        });
    }

    async fn handle_outcome(&self, run_id: &str, outcome: Result<LoopOutcome>) {
        let inner = &self.inner;
        let attempt_index = inner
            .runs
            .load(run_id)
            .ok()
            .flatten()
            .map(|r| r.current_attempt)
            .unwrap_or(0);

        match outcome {
            Ok(LoopOutcome::Completed { result }) => {
                self.harvest(run_id);
                self.teardown(run_id).await;
                let _ = inner.signals.send(RunSignal::Completed {
                    run_id: run_id.to_string(),
                    attempt_index,
                    result,
                });
            }
            Ok(LoopOutcome::AwaitingInput { question }) => {
                // Container and live entry stay for the round-trip.
                let _ = inner.signals.send(RunSignal::AwaitingInput {
                    run_id: run_id.to_string(),
                    attempt_index,
                    question,
                });
            }
            Ok(LoopOutcome::AwaitingApproval { action }) => {
                let _ = inner.signals.send(RunSignal::AwaitingApproval {
                    run_id: run_id.to_string(),
                    attempt_index,
                    action,
                });
            }
            Ok(LoopOutcome::Failed { summary }) => {
                self.retry_or_surface(run_id, attempt_index, summary).await;
            }
            Ok(LoopOutcome::Canceled) => {
                // cancel_run already persisted, tore down, and told its
                // caller; a second signal would be a double report. An
                // iteration racing the cancel may have re-persisted a
                // `running` snapshot, so re-assert the failed status.
                if let Ok(mut run) = self.load(run_id) {
                    if !run.status.is_terminal() {
                        if let Some(attempt) = run.current_mut() {
                            attempt.status = AttemptStatus::Failed;
                            attempt.ended_at = Some(Utc::now());
                        }
                        run.status = RunStatus::Failed;
                        let _ = inner.runs.save(&run);
                    }
                }
            }
            Err(e) => {
                // Nothing inside the loop may crash the host: classify,
                // persist, signal.
                error!(run_id, "attempt loop error: {e:#}");
                let message = format!("{e:#}");
                let category = super::failure::classify_loop_error(&message);
                let summary = FailureSummary {
                    category,
                    last_error_code: None,
                    retryable: false,
                    next_action: NextAction::Stop,
                    recent_results: Vec::new(),
                    hint: Some(format!("The run stopped on an internal error: {message}")),
                };
                if let Ok(mut run) = self.load(run_id) {
                    if !run.status.is_terminal() {
                        if let Some(attempt) = run.current_mut() {
                            attempt.status = AttemptStatus::Failed;
                            attempt.failure = Some(summary.clone());
                            attempt.ended_at = Some(Utc::now());
                        }
                        run.status = RunStatus::Failed;
                        let _ = inner.runs.save(&run);
                    }
                }
                self.teardown(run_id).await;
                let _ = inner.signals.send(RunSignal::Failed {
                    run_id: run_id.to_string(),
                    attempt_index,
                    failure: summary,
                });
            }
        }
    }

    /// Auto-retry a retryable failure while attempts remain; otherwise emit
    /// the terminal failure signal.
    async fn retry_or_surface(&self, run_id: &str, attempt_index: usize, summary: FailureSummary) {
        let inner = &self.inner;
        let can_retry = summary.retryable
            && matches!(
                summary.category,
                FailureCategory::ToolFailure | FailureCategory::ModelFailure
            );

        if can_retry {
            let guidance = summary.hint.clone().unwrap_or_else(|| {
                "The previous attempt failed repeatedly; take a different approach.".to_string()
            });
            match self.retry_run(run_id, &guidance, Vec::new(), Vec::new()).await {
                Ok(retried) => {
                    info!(run_id, attempt = retried.attempt_index, "auto-retry spawned");
                    return;
                }
                Err(RunError::AttemptsExhausted(_)) => {
                    info!(run_id, "attempts exhausted; surfacing failure");
                }
                Err(e) => {
                    warn!(run_id, "auto-retry failed: {e}");
                }
            }
        }

        self.teardown(run_id).await;
        let _ = inner.signals.send(RunSignal::Failed {
            run_id: run_id.to_string(),
            attempt_index,
            failure: summary,
        });
    }

    fn harvest(&self, run_id: &str) {
        let inner = &self.inner;
        let Ok(run) = self.load(run_id) else {
            return;
        };
        match inner
            .harvester
            .harvest(&run.workspace, run.baseline.as_ref())
        {
            Ok(report) if !report.is_empty() => {
                info!(
                    run_id,
                    created = report.created.len(),
                    updated = report.updated.len(),
                    "skills harvested"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(run_id, "skill harvest failed: {e:#}"),
        }
    }

    /// Fail a run in place (expiry, denial) and emit the terminal signal.
    async fn fail_run_in_place(&self, run: &mut Run, reason: &str) -> Result<(), RunError> {
        let inner = &self.inner;
        let summary = FailureSummary {
            category: FailureCategory::Unknown,
            last_error_code: None,
            retryable: false,
            next_action: NextAction::Stop,
            recent_results: Vec::new(),
            hint: Some(reason.to_string()),
        };
        if let Some(attempt) = run.current_mut() {
            attempt.status = AttemptStatus::Failed;
            attempt.failure = Some(summary.clone());
            attempt.ended_at = Some(Utc::now());
        }
        run.status = RunStatus::Failed;
        inner.runs.save(run)?;

        self.teardown(&run.id).await;
        let _ = inner.signals.send(RunSignal::Failed {
            run_id: run.id.clone(),
            attempt_index: run.current_attempt,
            failure: summary,
        });
        Ok(())
    }

    /// Destroy the environment, drop the live entry, release the mutex.
    async fn teardown(&self, run_id: &str) {
        let inner = &self.inner;
        inner.live.lock().remove(run_id);
        if let Err(e) = inner.runtime.destroy(run_id).await {
            warn!(run_id, "container destroy failed: {e:#}");
        }
        if let Err(e) = inner.runs.release_active(run_id) {
            warn!(run_id, "active-slot release failed: {e:#}");
        }
    }

    /// Drop the environment handle but keep the live entry (vault, token):
    /// the next dispatch recreates the container with current settings.
    async fn reset_environment(&self, run_id: &str) {
        let live = self.live_entry(run_id);
        let mut slot = live.handle_slot.lock().await;
        if slot.take().is_some() {
            if let Err(e) = self.inner.runtime.destroy(run_id).await {
                warn!(run_id, "container destroy failed: {e:#}");
            }
        }
    }
}

/// What `recover_on_restart` did.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub resumed: Vec<String>,
    pub failed: Vec<String>,
    pub pruned_containers: usize,
}

/// Append the user's reply to a paused attempt. When the pause recorded a
/// tool-call id, the reply is a paired tool result; an auto-triggered pause
/// (no model call) gets a plain user message instead.
fn inject_user_reply(run: &mut Run, reply: &str) {
    let Some(attempt) = run.current_mut() else {
        return;
    };
    let message = match attempt.pending_tool_call_id.take() {
        Some(tool_call_id) => ModelMessage {
            role: Role::User,
            content: vec![Content::ToolResult {
                tool_use_id: tool_call_id,
                output: serde_json::Value::String(reply.to_string()),
                is_error: None,
            }],
        },
        None => ModelMessage::user_text(reply),
    };
    attempt.messages.push(message);
    attempt.status = AttemptStatus::Running;
    attempt.pending_question = None;
    attempt.pending_approval = None;
    attempt.paused_at = None;
}
