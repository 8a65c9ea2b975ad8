//! The run engine: state machine, attempt loop, manager and signals

pub mod attempt_loop;
pub mod failure;
pub mod history;
pub mod manager;
pub mod signals;
pub mod types;

pub use manager::{
    EnergyGauge, FullEnergy, ManagerDeps, RecoveryReport, RetriedRun, RunError, RunManager,
    StartOptions, StartedRun, StatusChange,
};
pub use signals::{RunSignal, SignalReceiver, SignalSender};
pub use types::{
    Attempt, AttemptStatus, FailureCategory, FailureSummary, NextAction, RecoveryContext, Run,
    RunConfig, RunFilter, RunStatus,
};
