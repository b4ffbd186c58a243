//! Finite state machine for a single target run

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::StepKind;

/// Why a target run did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetError {
    #[error("{step} failed after {attempts} attempt(s): {detail}")]
    StepFailed {
        step: StepKind,
        attempts: u32,
        detail: String,
    },

    #[error("Backup failed: {detail}")]
    BackupFailed { detail: String },

    #[error("Installation did not verify: {detail}")]
    VerificationFailed { detail: String },

    #[error("Non-critical step(s) failed: {}", join_steps(.steps))]
    Degraded { steps: Vec<StepKind> },

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {detail}")]
    Internal { detail: String },
}

fn join_steps(steps: &[StepKind]) -> String {
    steps.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
}

/// Target run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    /// Waiting for an admission slot
    Pending,

    /// Executing steps
    Running,

    /// Every step succeeded
    Succeeded,

    /// A critical step failed
    Failed,

    /// Installed, but a best-effort step failed
    Partial,

    /// Cancelled before completion
    Aborted,
}

impl TargetStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TargetStatus::Pending | TargetStatus::Running)
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Running => "running",
            TargetStatus::Succeeded => "succeeded",
            TargetStatus::Failed => "failed",
            TargetStatus::Partial => "partial",
            TargetStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Target run event
#[derive(Debug, Clone)]
pub enum TargetEvent {
    /// Admitted, first step about to run
    Start,

    /// All steps succeeded
    Succeed,

    /// Finished with best-effort failures
    Degrade(TargetError),

    /// A critical step failed
    Fail(TargetError),

    /// Cancelled or never started
    Abort,
}

/// Target run FSM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFsm {
    status: TargetStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<TargetError>,
}

impl TargetFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            status: TargetStatus::Pending,
            error: None,
        }
    }

    /// Get current status
    pub fn status(&self) -> TargetStatus {
        self.status
    }

    /// Get error if any
    pub fn error(&self) -> Option<&TargetError> {
        self.error.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: TargetEvent) -> Result<(), String> {
        let new_status = match (self.status, event) {
            (TargetStatus::Pending, TargetEvent::Start) => TargetStatus::Running,
            (TargetStatus::Pending, TargetEvent::Abort) => {
                self.error = Some(TargetError::Cancelled);
                TargetStatus::Aborted
            }

            (TargetStatus::Running, TargetEvent::Succeed) => TargetStatus::Succeeded,
            (TargetStatus::Running, TargetEvent::Degrade(err)) => {
                self.error = Some(err);
                TargetStatus::Partial
            }
            (TargetStatus::Running, TargetEvent::Fail(err)) => {
                self.error = Some(err);
                TargetStatus::Failed
            }
            (TargetStatus::Running, TargetEvent::Abort) => {
                self.error = Some(TargetError::Cancelled);
                TargetStatus::Aborted
            }

            // A run that never got going can still fail (e.g. a crashed task)
            (TargetStatus::Pending, TargetEvent::Fail(err)) => {
                self.error = Some(err);
                TargetStatus::Failed
            }

            (status, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", status, event));
            }
        };

        self.status = new_status;
        Ok(())
    }
}

impl Default for TargetFsm {
    fn default() -> Self {
        Self::new()
    }
}
