//! Motor: an agentic task-execution engine.
//!
//! Takes a natural-language task and a grant of tools, drives an LLM in a
//! bounded tool-calling loop inside an isolated workspace, persists progress
//! after every step for crash recovery, supports pause/resume for user input
//! or approval, classifies failures and retries with corrective guidance,
//! all behind filesystem and network boundaries around untrusted,
//! model-generated actions.
//!
//! ```rust,ignore
//! use motor_core::prelude::*;
//!
//! let (manager, mut signals) = RunManager::new(deps);
//! let started = manager.start_run(StartOptions { /* task, tools, ... */ }).await?;
//! while let Some(signal) = signals.recv().await {
//!     match signal {
//!         RunSignal::Completed { result, .. } => println!("{result}"),
//!         RunSignal::AwaitingInput { question, .. } => { /* ask, then respond_to_run */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod ai;
pub mod config;
pub mod container;
pub mod paths;
pub mod run;
pub mod skills;
pub mod storage;
pub mod tools;

pub mod prelude {
    pub use crate::ai::{AnthropicClient, CompletionClient};
    pub use crate::config::EngineConfig;
    pub use crate::container::{ContainerRuntime, LocalRuntime};
    pub use crate::run::{
        EnergyGauge, FullEnergy, ManagerDeps, RunConfig, RunError, RunFilter, RunManager,
        RunSignal, RunStatus, StartOptions,
    };
    pub use crate::skills::SkillHarvester;
    pub use crate::storage::{KeyValueStore, MemoryStore, SqliteStore};
    pub use crate::tools::{implementations::register_default_tools, ToolRegistry};
}
