//! Sequential step execution for one target

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::deploy::backup::BackupManager;
use crate::deploy::executor::{RemoteExecutor, StepOutput};
use crate::deploy::fsm::{TargetError, TargetStatus};
use crate::models::{Profile, Target};
use crate::plan::{ExecutionPlan, Step, StepAction, StepKind, StepPolicy};

/// Step execution settings
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Bound on a single executor call; exceeding it counts as a failure
    pub step_timeout: Duration,

    /// Retries for retryable steps
    pub retry_count: u32,

    /// Fixed delay between retries
    pub retry_delay: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(300),
            retry_count: 1,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Step status as reported in results and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Succeeded,
    /// Failed, another attempt follows
    Retrying,
    Failed,
    Skipped,
}

/// One transition of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub kind: StepKind,
    pub status: StepStatus,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StepOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Final outcome of a target run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub status: TargetStatus,
    pub error: Option<TargetError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// About to announce the current step
    Announce,
    /// Announced, about to execute the current step
    Execute,
    Done,
}

/// Builds [`StepRun`]s for targets
#[derive(Clone)]
pub struct StepExecutor {
    settings: RunSettings,
    backups: Arc<BackupManager>,
}

impl StepExecutor {
    pub fn new(settings: RunSettings, backups: Arc<BackupManager>) -> Self {
        Self { settings, backups }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Start running `plan` against `target`. Nothing happens until the
    /// returned run is polled.
    pub fn run(
        &self,
        plan: Arc<ExecutionPlan>,
        profile: Arc<Profile>,
        target: Target,
        executor: Arc<dyn RemoteExecutor>,
    ) -> StepRun {
        StepRun {
            plan,
            profile,
            target,
            executor,
            settings: self.settings.clone(),
            backups: self.backups.clone(),
            cancel: None,
            index: 0,
            attempt: 0,
            retry_pending: false,
            phase: Phase::Announce,
            degraded: Vec::new(),
            outcome: None,
        }
    }
}

/// A lazy, finite sequence of step transitions for one target.
///
/// Each call to [`next`](Self::next) performs at most one executor call.
/// A finished run cannot be restarted; build a new one from step 0.
pub struct StepRun {
    plan: Arc<ExecutionPlan>,
    profile: Arc<Profile>,
    target: Target,
    executor: Arc<dyn RemoteExecutor>,
    settings: RunSettings,
    backups: Arc<BackupManager>,
    cancel: Option<watch::Receiver<bool>>,
    index: usize,
    attempt: u32,
    retry_pending: bool,
    phase: Phase,
    degraded: Vec<StepKind>,
    outcome: Option<TargetOutcome>,
}

impl StepRun {
    /// Stop between steps once `cancel` reads true
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The outcome, once the run is finished
    pub fn outcome(&self) -> Option<&TargetOutcome> {
        self.outcome.as_ref()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    fn finish(&mut self, status: TargetStatus, error: Option<TargetError>) {
        self.phase = Phase::Done;
        self.outcome = Some(TargetOutcome { status, error });
    }

    fn advance(&mut self) {
        self.index += 1;
        self.attempt = 0;
        self.phase = Phase::Announce;
    }

    fn result(&self, kind: StepKind, status: StepStatus) -> StepResult {
        StepResult {
            index: self.index,
            kind,
            status,
            attempt: self.attempt,
            timestamp: Utc::now(),
            output: None,
            detail: None,
        }
    }

    /// Produce the next step transition, or `None` once the run is over
    pub async fn next(&mut self) -> Option<StepResult> {
        match self.phase {
            Phase::Done => None,
            Phase::Announce => self.announce().await,
            Phase::Execute => Some(self.execute_current().await),
        }
    }

    async fn announce(&mut self) -> Option<StepResult> {
        if self.retry_pending {
            self.retry_pending = false;
            tokio::time::sleep(self.settings.retry_delay).await;
        }

        // A cancel that lands during the last step still aborts the run
        if self.is_cancelled() {
            info!(target_id = %self.target.id, step = self.index, "Run cancelled before step");
            self.finish(TargetStatus::Aborted, Some(TargetError::Cancelled));
            return None;
        }

        if self.index >= self.plan.len() {
            if self.degraded.is_empty() {
                self.finish(TargetStatus::Succeeded, None);
            } else {
                let steps = self.degraded.clone();
                self.finish(TargetStatus::Partial, Some(TargetError::Degraded { steps }));
            }
            return None;
        }

        self.attempt += 1;
        self.phase = Phase::Execute;
        let kind = self.plan.steps[self.index].kind;
        Some(self.result(kind, StepStatus::Running))
    }

    async fn execute_current(&mut self) -> StepResult {
        let plan = self.plan.clone();
        let step = &plan.steps[self.index];

        let output = match &step.action {
            StepAction::BackupExisting { install_path, .. } => {
                match self.prepare_backup(step, install_path).await {
                    Ok(Some(resolved)) => self.call(&resolved).await,
                    Ok(None) => {
                        debug!(target_id = %self.target.id, "Nothing to back up");
                        let mut result = self.result(step.kind, StepStatus::Skipped);
                        result.detail = Some("no existing installation".to_string());
                        self.advance();
                        return result;
                    }
                    Err(detail) => StepOutput::failed(detail),
                }
            }
            _ => self.call(step).await,
        };

        if output.success {
            let mut result = self.result(step.kind, StepStatus::Succeeded);
            result.output = Some(output);
            self.advance();
            return result;
        }

        let detail = output.detail().unwrap_or_default();
        warn!(
            target_id = %self.target.id,
            step = %step.kind,
            attempt = self.attempt,
            error = %detail,
            "Step failed"
        );

        let mut result = self.result(step.kind, StepStatus::Failed);
        result.output = Some(output);
        result.detail = Some(detail.clone());

        match step.kind.policy() {
            StepPolicy::FailFast => {
                let error = if step.kind == StepKind::BackupExisting {
                    TargetError::BackupFailed { detail }
                } else {
                    TargetError::StepFailed {
                        step: step.kind,
                        attempts: self.attempt,
                        detail,
                    }
                };
                self.finish(TargetStatus::Failed, Some(error));
            }
            StepPolicy::Retry if self.attempt <= self.settings.retry_count => {
                result.status = StepStatus::Retrying;
                self.retry_pending = true;
                self.phase = Phase::Announce;
            }
            StepPolicy::Retry => {
                self.finish(
                    TargetStatus::Failed,
                    Some(TargetError::StepFailed {
                        step: step.kind,
                        attempts: self.attempt,
                        detail,
                    }),
                );
            }
            StepPolicy::BestEffort => {
                self.degraded.push(step.kind);
                self.advance();
            }
            StepPolicy::Acceptance => {
                self.finish(TargetStatus::Failed, Some(TargetError::VerificationFailed { detail }));
            }
        }

        result
    }

    /// Returns the backup step with its destination filled in, `None` when
    /// there is nothing to back up, or the reason the check failed.
    async fn prepare_backup(&self, step: &Step, install_path: &str) -> Result<Option<Step>, String> {
        let probe = tokio::time::timeout(
            self.settings.step_timeout,
            self.executor.has_existing_install(&self.target, install_path),
        )
        .await;

        let existing = match probe {
            Ok(Ok(existing)) => existing,
            Ok(Err(e)) => return Err(format!("cannot inspect {}: {}", install_path, e)),
            Err(_) => {
                return Err(format!(
                    "inspecting {} timed out after {:?}",
                    install_path, self.settings.step_timeout
                ))
            }
        };

        if !self.backups.should_backup(&self.profile, existing) {
            return Ok(None);
        }

        let mut resolved = step.clone();
        if let StepAction::BackupExisting { destination, .. } = &mut resolved.action {
            *destination = Some(self.backups.next_destination(&self.profile, self.plan.os));
        }
        Ok(Some(resolved))
    }

    async fn call(&self, step: &Step) -> StepOutput {
        debug!(
            target_id = %self.target.id,
            executor = self.executor.name(),
            step = %step.kind,
            attempt = self.attempt,
            "Executing step"
        );
        match tokio::time::timeout(
            self.settings.step_timeout,
            self.executor.execute(&self.target, step),
        )
        .await
        {
            Ok(output) => output,
            Err(_) => StepOutput::failed(format!(
                "timed out after {:?}",
                self.settings.step_timeout
            )),
        }
    }

    /// Consume the run as a stream of results
    pub fn into_stream(self) -> impl Stream<Item = StepResult> {
        stream::unfold(self, |mut run| async move {
            let result = run.next().await?;
            Some((result, run))
        })
    }
}
