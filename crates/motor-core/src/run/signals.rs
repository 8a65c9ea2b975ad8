//! Result signals
//!
//! The one outbound channel through which run outcomes reach the rest of the
//! system; there is no polling surface. State is always persisted before a
//! signal is emitted.

use serde::Serialize;
use tokio::sync::mpsc;

use super::types::FailureSummary;

/// A run outcome or pause, consumed by the layer that requested the run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunSignal {
    /// Terminal success.
    Completed {
        run_id: String,
        attempt_index: usize,
        result: String,
    },

    /// Terminal failure (retries exhausted, non-retryable, or canceled).
    Failed {
        run_id: String,
        attempt_index: usize,
        failure: FailureSummary,
    },

    /// The run paused for a user answer.
    AwaitingInput {
        run_id: String,
        attempt_index: usize,
        question: String,
    },

    /// The run paused for a user approval.
    AwaitingApproval {
        run_id: String,
        attempt_index: usize,
        action: String,
    },
}

pub type SignalSender = mpsc::UnboundedSender<RunSignal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<RunSignal>;

pub fn signal_channel() -> (SignalSender, SignalReceiver) {
    mpsc::unbounded_channel()
}
