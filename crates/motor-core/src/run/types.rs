//! Run and attempt records
//!
//! These are the durable records the engine persists after every loop
//! iteration. Once a run reaches a terminal status the record is immutable;
//! garbage collection is the store's concern, not ours.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ai::types::ModelMessage;
use crate::skills::BaselineManifest;

/// Default cap on attempts per run.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Default cap on loop iterations per attempt.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    AwaitingInput,
    AwaitingApproval,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn is_paused(self) -> bool {
        matches!(self, RunStatus::AwaitingInput | RunStatus::AwaitingApproval)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Running => "running",
            RunStatus::AwaitingInput => "awaiting_input",
            RunStatus::AwaitingApproval => "awaiting_approval",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// Attempt status mirrors the run status minus `created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Running,
    AwaitingInput,
    AwaitingApproval,
    Completed,
    Failed,
}

/// Per-run configuration supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Inject the `ask_user` synthetic tool.
    pub inject_ask_user: bool,
    /// Inject the `request_approval` synthetic tool.
    pub inject_request_approval: bool,
    /// Inject the `save_credential` synthetic tool.
    pub inject_save_credential: bool,
    /// Install declared dependencies into the workspace before the loop runs.
    pub install_dependencies: bool,
    /// Merge the launching skill's allowed domains into the run's allow-list.
    pub merge_skill_domains: bool,
    /// Allow-list of credential names `save_credential` may store.
    pub credential_scope: Option<Vec<String>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            inject_ask_user: true,
            inject_request_approval: true,
            inject_save_credential: false,
            install_dependencies: false,
            merge_skill_domains: true,
            credential_scope: None,
        }
    }
}

/// One task execution, possibly spanning multiple attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    pub task: String,
    /// Tool names the model may call.
    pub tools: Vec<String>,
    /// Append-only; only the current attempt is ever mutated in place.
    pub attempts: Vec<Attempt>,
    pub current_attempt: usize,
    pub max_attempts: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub energy_consumed: f64,
    pub container_id: Option<String>,
    pub workspace: PathBuf,
    /// Hostnames `fetch` may contact (skill policy + explicit grants, deduplicated).
    pub allowed_domains: Vec<String>,
    /// Credentials captured mid-run via `save_credential`.
    pub pending_credentials: HashMap<String, String>,
    pub config: RunConfig,
    /// Final natural-language result once completed.
    pub result: Option<String>,
    /// Skill the workspace was seeded from, if any.
    pub skill: Option<String>,
    /// Per-file hashes captured at workspace setup, for skill harvesting.
    pub baseline: Option<BaselineManifest>,
}

impl Run {
    /// The attempt currently being driven (or last driven).
    pub fn current(&self) -> Option<&Attempt> {
        self.attempts.get(self.current_attempt)
    }

    pub fn current_mut(&mut self) -> Option<&mut Attempt> {
        self.attempts.get_mut(self.current_attempt)
    }
}

/// One LLM-conversation thread attempting the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// "att_N"
    pub id: String,
    pub index: usize,
    pub status: AttemptStatus,
    /// Conversation history. Never shared across attempts: a retry starts a
    /// fresh history seeded with the task plus recovery guidance.
    pub messages: Vec<ModelMessage>,
    /// Resume point; always <= max_iterations.
    pub step_cursor: usize,
    pub max_iterations: usize,
    pub trace: Vec<TraceEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_approval: Option<String>,
    /// Tool-call id the pause must be paired with on resume. Absent when the
    /// pause was auto-triggered (e.g. blocked domain) without a model call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_tool_call_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
}

impl Attempt {
    pub fn new(index: usize, messages: Vec<ModelMessage>, max_iterations: usize) -> Self {
        Self {
            id: format!("att_{index}"),
            index,
            status: AttemptStatus::Running,
            messages,
            step_cursor: 0,
            max_iterations,
            trace: Vec::new(),
            recovery: None,
            failure: None,
            pending_question: None,
            pending_approval: None,
            pending_tool_call_id: None,
            started_at: Utc::now(),
            ended_at: None,
            paused_at: None,
        }
    }

    pub fn clear_pending(&mut self) {
        self.pending_question = None;
        self.pending_approval = None;
        self.pending_tool_call_id = None;
        self.paused_at = None;
    }
}

/// One executed tool call, for diagnostics and failure summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub iteration: usize,
    pub tool: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub duration_ms: u64,
    /// Truncated tool output, kept for the failure summary's recent window.
    pub output_excerpt: String,
}

/// Guidance injected into a retry attempt's opening prompt.
///
/// The source tag is load-bearing: recovery guidance is presented as coming
/// from a supervising policy layer, never as if the end user wrote it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryContext {
    /// Always "supervisor".
    pub source: String,
    /// Attempt id this guidance corrects.
    pub corrects_attempt: String,
    pub guidance: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
}

impl RecoveryContext {
    pub fn from_supervisor(corrects_attempt: &str, guidance: impl Into<String>) -> Self {
        Self {
            source: "supervisor".to_string(),
            corrects_attempt: corrects_attempt.to_string(),
            guidance: guidance.into(),
            constraints: Vec::new(),
        }
    }
}

/// Why an attempt failed, and what to do about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSummary {
    pub category: FailureCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_code: Option<String>,
    pub retryable: bool,
    pub next_action: NextAction,
    /// Up to the last two iterations' tool results, truncated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_results: Vec<String>,
    /// Model self-diagnosis, when one could be obtained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    ToolFailure,
    ModelFailure,
    InfraFailure,
    BudgetExhausted,
    InvalidTask,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    RetryWithGuidance,
    AskUser,
    Stop,
}

/// Filter for `list_runs`.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_terminality() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::AwaitingInput.is_paused());
        assert!(!RunStatus::Created.is_paused());
    }

    #[test]
    fn run_record_roundtrips_through_json() {
        let attempt = Attempt::new(0, vec![ModelMessage::user_text("task")], 10);
        let run = Run {
            id: "run_1".into(),
            status: RunStatus::Running,
            task: "task".into(),
            tools: vec!["read".into()],
            attempts: vec![attempt],
            current_attempt: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            started_at: Utc::now(),
            completed_at: None,
            energy_consumed: 0.0,
            container_id: None,
            workspace: PathBuf::from("/tmp/w"),
            allowed_domains: vec!["api.example.com".into()],
            pending_credentials: HashMap::new(),
            config: RunConfig::default(),
            result: None,
            skill: None,
            baseline: None,
        };

        let json = serde_json::to_string(&run).unwrap();
        let back: Run = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "run_1");
        assert_eq!(back.attempts[0].id, "att_0");
        assert_eq!(back.status, RunStatus::Running);
    }
}
