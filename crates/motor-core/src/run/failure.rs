//! Failure detection and classification
//!
//! Individual tool errors are recovered locally: the model sees them and can
//! react. What fails an attempt is the same call failing the same way three
//! times in a row, an exhausted iteration budget, or an exception the loop
//! itself could not absorb.

use std::sync::Arc;
use std::time::Duration;

use crate::ai::client::{CallOptions, CompletionClient, CompletionRequest};
use crate::ai::types::ModelMessage;
use crate::run::types::{Attempt, FailureCategory, FailureSummary, NextAction};

/// The attempt fails on the Nth identical consecutive failure.
pub const CONSECUTIVE_FAILURE_THRESHOLD: usize = 3;

/// How much tool output a failure summary keeps per iteration.
const EXCERPT_LEN: usize = 400;

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
pub fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

const SELF_DIAGNOSIS_TIMEOUT: Duration = Duration::from_secs(15);

/// Tracks a running streak of identical (tool, error code, args) failures.
#[derive(Debug, Default)]
pub struct FailureStreak {
    signature: Option<String>,
    count: usize,
}

impl FailureStreak {
    /// Record a failed call; returns the current streak length.
    pub fn observe(&mut self, tool: &str, error_code: &str, args: &serde_json::Value) -> usize {
        let signature = format!("{tool}|{error_code}|{args}");
        if self.signature.as_deref() == Some(signature.as_str()) {
            self.count += 1;
        } else {
            self.signature = Some(signature);
            self.count = 1;
        }
        self.count
    }

    /// A success (or any non-identical outcome) breaks the streak.
    pub fn reset(&mut self) {
        self.signature = None;
        self.count = 0;
    }
}

/// Message patterns that mark an error as infrastructure rather than
/// something the model did. Infra failures are never auto-retried.
pub fn is_infra_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    [
        "container",
        "sandbox",
        "storage",
        "database",
        "disk full",
        "no space left",
        "connection refused",
        "runtime unavailable",
    ]
    .iter()
    .any(|pattern| lower.contains(pattern))
}

/// Classify an error that escaped the loop body.
pub fn classify_loop_error(message: &str) -> FailureCategory {
    if is_infra_error(message) {
        FailureCategory::InfraFailure
    } else {
        FailureCategory::ModelFailure
    }
}

/// Build a failure summary from the attempt's recent trace.
pub fn build_summary(
    category: FailureCategory,
    attempt: &Attempt,
    last_error_code: Option<String>,
    hint: Option<String>,
) -> FailureSummary {
    let retryable = matches!(
        category,
        FailureCategory::ToolFailure | FailureCategory::ModelFailure
    );
    let next_action = match category {
        FailureCategory::ToolFailure | FailureCategory::ModelFailure => {
            NextAction::RetryWithGuidance
        }
        FailureCategory::BudgetExhausted | FailureCategory::InvalidTask => NextAction::AskUser,
        FailureCategory::InfraFailure | FailureCategory::Unknown => NextAction::Stop,
    };

    let recent_results = attempt
        .trace
        .iter()
        .rev()
        .take(2)
        .map(|entry| {
            let excerpt = truncate_utf8(&entry.output_excerpt, EXCERPT_LEN);
            format!("[{}] {}", entry.tool, excerpt)
        })
        .collect();

    FailureSummary {
        category,
        last_error_code,
        retryable,
        next_action,
        recent_results,
        hint,
    }
}

/// Best-effort: ask the model for a one-to-two-sentence self-diagnosis.
/// Failure to obtain one is non-fatal and returns `None`.
pub async fn self_diagnose(
    client: &Arc<dyn CompletionClient>,
    attempt: &Attempt,
) -> Option<String> {
    let recent: Vec<String> = attempt
        .trace
        .iter()
        .rev()
        .take(2)
        .map(|entry| format!("{}: {}", entry.tool, entry.output_excerpt))
        .collect();
    if recent.is_empty() {
        return None;
    }

    let request = CompletionRequest {
        messages: vec![
            ModelMessage::system_text(
                "You diagnose failed automation runs. Answer in one or two plain sentences: \
                 why did these tool calls keep failing, and what should a retry do differently?",
            ),
            ModelMessage::user_text(recent.join("\n")),
        ],
        tools: vec![],
        options: CallOptions {
            max_tokens: 160,
            temperature: None,
            max_tool_calls: None,
        },
    };

    match tokio::time::timeout(SELF_DIAGNOSIS_TIMEOUT, client.complete(request)).await {
        Ok(Ok(response)) if !response.text.trim().is_empty() => {
            Some(response.text.trim().to_string())
        }
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            tracing::debug!("self-diagnosis call failed: {e:#}");
            None
        }
        Err(_) => {
            tracing::debug!("self-diagnosis call timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::types::TraceEntry;
    use serde_json::json;

    #[test]
    fn streak_counts_identical_failures_only() {
        let mut streak = FailureStreak::default();
        let args = json!({"path": "missing.txt"});

        assert_eq!(streak.observe("read", "not_found", &args), 1);
        assert_eq!(streak.observe("read", "not_found", &args), 2);
        assert_eq!(streak.observe("read", "not_found", &args), 3);
    }

    #[test]
    fn different_signature_restarts_the_streak() {
        let mut streak = FailureStreak::default();
        streak.observe("read", "not_found", &json!({"path": "a"}));
        streak.observe("read", "not_found", &json!({"path": "a"}));
        // Different args: not the same failure.
        assert_eq!(streak.observe("read", "not_found", &json!({"path": "b"})), 1);
    }

    #[test]
    fn reset_clears_the_streak() {
        let mut streak = FailureStreak::default();
        let args = json!({"x": 1});
        streak.observe("bash", "execution_error", &args);
        streak.observe("bash", "execution_error", &args);
        streak.reset();
        assert_eq!(streak.observe("bash", "execution_error", &args), 1);
    }

    #[test]
    fn infra_patterns() {
        assert!(is_infra_error("container runtime exited"));
        assert!(is_infra_error("Connection refused (os error 111)"));
        assert!(is_infra_error("database is locked"));
        assert!(!is_infra_error("file not found: foo.txt"));
    }

    #[test]
    fn summary_categories_drive_retryability() {
        let mut attempt = Attempt::new(0, vec![], 10);
        attempt.trace.push(TraceEntry {
            iteration: 0,
            tool: "read".into(),
            ok: false,
            error_code: Some("not_found".into()),
            duration_ms: 3,
            output_excerpt: "File not found: a.txt".into(),
        });

        let summary = build_summary(
            FailureCategory::ToolFailure,
            &attempt,
            Some("not_found".into()),
            None,
        );
        assert!(summary.retryable);
        assert_eq!(summary.next_action, NextAction::RetryWithGuidance);
        assert_eq!(summary.recent_results.len(), 1);

        let summary = build_summary(FailureCategory::BudgetExhausted, &attempt, None, None);
        assert!(!summary.retryable);
        assert_eq!(summary.next_action, NextAction::AskUser);

        let summary = build_summary(FailureCategory::InfraFailure, &attempt, None, None);
        assert!(!summary.retryable);
        assert_eq!(summary.next_action, NextAction::Stop);
    }
}
