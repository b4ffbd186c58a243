//! Jobs and per-target runs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deploy::fsm::{TargetError, TargetEvent, TargetFsm, TargetStatus};
use crate::deploy::runner::{StepResult, StepStatus, TargetOutcome};
use crate::models::{OsFamily, Target};
use crate::plan::{ExecutionPlan, StepKind};

pub type JobId = Uuid;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Partial,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Partial
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Partial => "partial",
        };
        f.write_str(s)
    }
}

/// How target failures affect the job status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Any failed target fails the job
    #[default]
    Strict,

    /// Failed targets only make the job partial, unless every target failed
    ContinueOnError,
}

/// Per-step state inside a target run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub kind: StepKind,
    pub state: StepState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One target's share of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRun {
    pub target: Target,
    #[serde(flatten)]
    fsm: TargetFsm,
    pub current_step: usize,
    pub steps: Vec<StepRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TargetRun {
    pub fn new(target: Target, plan: &ExecutionPlan) -> Self {
        Self {
            target,
            fsm: TargetFsm::new(),
            current_step: 0,
            steps: plan
                .steps
                .iter()
                .map(|s| StepRecord {
                    kind: s.kind,
                    state: StepState::Pending,
                    attempts: 0,
                    detail: None,
                })
                .collect(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn status(&self) -> TargetStatus {
        self.fsm.status()
    }

    pub fn error(&self) -> Option<&TargetError> {
        self.fsm.error()
    }

    pub fn is_terminal(&self) -> bool {
        self.fsm.is_terminal()
    }

    /// Pending -> running
    pub fn start(&mut self) -> Result<(), String> {
        self.fsm.process(TargetEvent::Start)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Apply one step transition
    pub fn record(&mut self, result: &StepResult) {
        let Some(record) = self.steps.get_mut(result.index) else {
            return;
        };
        self.current_step = result.index;
        record.attempts = record.attempts.max(result.attempt);
        record.detail = result.detail.clone();
        record.state = match result.status {
            StepStatus::Running | StepStatus::Retrying => StepState::Running,
            StepStatus::Succeeded => StepState::Succeeded,
            StepStatus::Failed => StepState::Failed,
            StepStatus::Skipped => StepState::Skipped,
        };
    }

    /// Running -> terminal, from the step runner's outcome
    pub fn finish(&mut self, outcome: TargetOutcome) -> Result<(), String> {
        let event = match outcome.status {
            TargetStatus::Succeeded => TargetEvent::Succeed,
            TargetStatus::Partial => TargetEvent::Degrade(
                outcome
                    .error
                    .unwrap_or(TargetError::Degraded { steps: Vec::new() }),
            ),
            TargetStatus::Aborted => TargetEvent::Abort,
            TargetStatus::Failed => TargetEvent::Fail(outcome.error.unwrap_or(
                TargetError::Internal {
                    detail: "failed without a reason".to_string(),
                },
            )),
            status => return Err(format!("{} is not a terminal status", status)),
        };
        self.fsm.process(event)?;
        self.close();
        Ok(())
    }

    /// Abort without running further steps
    pub fn abort(&mut self) -> Result<(), String> {
        self.fsm.process(TargetEvent::Abort)?;
        self.close();
        Ok(())
    }

    /// Fail outside the step runner (e.g. the target task crashed)
    pub fn fail(&mut self, error: TargetError) -> Result<(), String> {
        self.fsm.process(TargetEvent::Fail(error))?;
        self.close();
        Ok(())
    }

    fn close(&mut self) {
        self.finished_at = Some(Utc::now());
        for step in self.steps.iter_mut() {
            match step.state {
                StepState::Pending => step.state = StepState::Skipped,
                // Interrupted mid-retry
                StepState::Running => step.state = StepState::Failed,
                _ => {}
            }
        }
    }
}

/// An installation request fanned out over a set of targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub installation_id: String,
    pub profile_id: String,
    pub os: OsFamily,
    pub failure_policy: FailurePolicy,
    pub status: JobStatus,
    pub targets: Vec<TargetRun>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl Job {
    pub fn new(
        plan: &ExecutionPlan,
        targets: Vec<Target>,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            installation_id: plan.installation_id.clone(),
            profile_id: plan.profile_id.clone(),
            os: plan.os,
            failure_policy,
            status: JobStatus::Queued,
            targets: targets
                .into_iter()
                .map(|t| TargetRun::new(t, plan))
                .collect(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            diagnostic: None,
        }
    }

    pub fn target(&self, target_id: &str) -> Option<&TargetRun> {
        self.targets.iter().find(|t| t.target.id == target_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Queued -> running, on the first target start
    pub fn mark_running(&mut self) {
        if self.status == JobStatus::Queued {
            self.status = JobStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    fn count(&self, status: TargetStatus) -> usize {
        self.targets.iter().filter(|t| t.status() == status).count()
    }

    /// Job status implied by the target runs, with an optional diagnostic
    pub fn aggregate_status(&self) -> (JobStatus, Option<String>) {
        let total = self.targets.len();
        let failed = self.count(TargetStatus::Failed);

        if total > 0 && self.count(TargetStatus::Succeeded) == total {
            return (JobStatus::Succeeded, None);
        }
        if total > 0 && failed == total {
            return (JobStatus::Failed, Some("all targets failed".to_string()));
        }
        if failed > 0 && self.failure_policy == FailurePolicy::Strict {
            return (
                JobStatus::Failed,
                Some(format!("{} of {} targets failed", failed, total)),
            );
        }

        let aborted = self.count(TargetStatus::Aborted);
        let detail = match (failed, aborted) {
            (0, 0) => None,
            (f, 0) => Some(format!("{} of {} targets failed", f, total)),
            (0, a) => Some(format!("{} of {} targets aborted", a, total)),
            (f, a) => Some(format!(
                "{} of {} targets failed, {} aborted",
                f, total, a
            )),
        };
        (JobStatus::Partial, detail)
    }

    /// Settle the final status once every target is terminal
    pub fn complete(&mut self) -> JobStatus {
        let (status, diagnostic) = self.aggregate_status();
        self.status = status;
        self.diagnostic = diagnostic;
        self.completed_at = Some(Utc::now());
        status
    }
}
