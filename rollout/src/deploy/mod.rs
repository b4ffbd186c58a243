//! Deployment module

pub mod backup;
pub mod executor;
pub mod fsm;
pub mod runner;

pub use backup::BackupManager;
pub use executor::{DryRunExecutor, RemoteExecutor, StepOutput};
pub use fsm::{TargetError, TargetEvent, TargetFsm, TargetStatus};
pub use runner::{RunSettings, StepExecutor, StepResult, StepRun, StepStatus, TargetOutcome};
