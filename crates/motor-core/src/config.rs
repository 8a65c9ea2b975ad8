//! Engine configuration
//!
//! Loaded from `motor.toml`; every field has a sensible default so an empty
//! file (or none at all) is valid.

use std::path::Path;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::run::types::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_ITERATIONS};
use crate::tools::governor::{DEFAULT_MAX_BYTES, DEFAULT_MAX_LINES};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts per run before a failure becomes terminal.
    pub max_attempts: usize,
    /// Loop iterations per attempt.
    pub max_iterations: usize,
    /// Minimum energy required to start a run.
    pub min_energy: f64,
    /// Pending approvals expire after this many seconds.
    pub approval_timeout_secs: u64,
    /// A running run that never progressed is considered stale after this.
    pub stale_run_secs: u64,
    /// Containers older than this are pruned on restart.
    pub container_prune_secs: u64,
    /// Output governor budget.
    pub output_max_lines: usize,
    pub output_max_bytes: usize,
    /// Token budget per completion call.
    pub max_completion_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            min_energy: 1.0,
            approval_timeout_secs: 15 * 60,
            stale_run_secs: 5 * 60,
            container_prune_secs: 60 * 60,
            output_max_lines: DEFAULT_MAX_LINES,
            output_max_bytes: DEFAULT_MAX_BYTES,
            max_completion_tokens: 4096,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}
