//! Job admission, fan-out and aggregation

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::audit::AuditLog;
use crate::config::store::ConfigStore;
use crate::deploy::backup::BackupManager;
use crate::deploy::executor::RemoteExecutor;
use crate::deploy::fsm::{TargetError, TargetStatus};
use crate::deploy::runner::{RunSettings, StepExecutor, StepResult, TargetOutcome};
use crate::errors::{ConfigError, RolloutError};
use crate::models::{Profile, Target};
use crate::plan::{ExecutionPlan, PlanCache};
use crate::progress::bus::{EventStatus, ProgressBus, ProgressEvent};
use crate::scheduler::job::{FailurePolicy, Job, JobId, JobStatus};
use crate::scheduler::registry::JobRegistry;

/// Scheduler options
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum target runs executing at once, across all jobs
    pub max_concurrent_target_runs: usize,

    /// Step execution settings
    pub run: RunSettings,

    /// How long terminal jobs stay queryable
    pub job_retention: Duration,

    /// Applied when a submission does not pick a policy
    pub default_failure_policy: FailurePolicy,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_target_runs: 5,
            run: RunSettings::default(),
            job_retention: Duration::from_secs(3600),
            default_failure_policy: FailurePolicy::Strict,
        }
    }
}

/// A request to install one package on a set of targets
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub installation_id: String,
    pub profile_id: String,
    pub targets: Vec<Target>,
    pub failure_policy: Option<FailurePolicy>,
}

impl SubmitRequest {
    pub fn new(
        installation_id: impl Into<String>,
        profile_id: impl Into<String>,
        targets: Vec<Target>,
    ) -> Self {
        Self {
            installation_id: installation_id.into(),
            profile_id: profile_id.into(),
            targets,
            failure_policy: None,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }
}

/// Admits target runs under a global concurrency cap and aggregates their
/// outcomes into job status.
///
/// Cheap to clone; clones share the same registry, bus and admission
/// semaphore.
#[derive(Clone)]
pub struct JobScheduler {
    config: Arc<ConfigStore>,
    plans: Arc<PlanCache>,
    bus: Arc<ProgressBus>,
    executor: Arc<dyn RemoteExecutor>,
    steps: StepExecutor,
    permits: Arc<Semaphore>,
    registry: Arc<Mutex<JobRegistry>>,
    default_policy: FailurePolicy,
    audit: Option<AuditLog>,
}

impl JobScheduler {
    pub fn new(
        options: SchedulerOptions,
        config: Arc<ConfigStore>,
        plans: Arc<PlanCache>,
        bus: Arc<ProgressBus>,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        let steps = StepExecutor::new(options.run.clone(), Arc::new(BackupManager::new()));
        Self {
            config,
            plans,
            bus,
            executor,
            steps,
            permits: Arc::new(Semaphore::new(options.max_concurrent_target_runs.max(1))),
            registry: Arc::new(Mutex::new(JobRegistry::new(options.job_retention))),
            default_policy: options.default_failure_policy,
            audit: None,
        }
    }

    /// Write an audit record for every finished job
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    fn registry(&self) -> MutexGuard<'_, JobRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate a request and start a job for it.
    ///
    /// Nothing is created when validation fails. Must be called from within
    /// a Tokio runtime.
    pub fn submit(&self, request: SubmitRequest) -> Result<JobId, ConfigError> {
        if request.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        let mut seen = HashSet::new();
        if let Some(dup) = request.targets.iter().find(|t| !seen.insert(t.id.as_str())) {
            return Err(ConfigError::DuplicateTarget(dup.id.clone()));
        }

        let pair = self
            .config
            .resolve(&request.installation_id, &request.profile_id)?;

        if let Some(target) = request
            .targets
            .iter()
            .find(|t| t.os != pair.installation.os)
        {
            return Err(ConfigError::TargetOsMismatch {
                target_id: target.id.clone(),
                target_os: target.os,
                installation_id: pair.installation.id.clone(),
                installation_os: pair.installation.os,
            });
        }

        let plan = self.plans.get_or_build(&pair);
        let policy = request.failure_policy.unwrap_or(self.default_policy);
        let job = Job::new(&plan, request.targets.clone(), policy);
        let job_id = job.id;

        info!(
            job_id = %job_id,
            installation_id = %pair.installation.id,
            profile_id = %pair.profile.id,
            targets = request.targets.len(),
            steps = plan.len(),
            policy = ?policy,
            "Job submitted"
        );

        self.bus.open(job_id);
        let cancel = self.registry().insert(job);

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler
                .drive(job_id, plan, pair.profile, request.targets, cancel)
                .await;
        });

        Ok(job_id)
    }

    async fn drive(
        self,
        job_id: JobId,
        plan: Arc<ExecutionPlan>,
        profile: Arc<Profile>,
        targets: Vec<Target>,
        cancel: watch::Receiver<bool>,
    ) {
        let mut handles = Vec::with_capacity(targets.len());
        for (index, target) in targets.into_iter().enumerate() {
            let scheduler = self.clone();
            let plan = plan.clone();
            let profile = profile.clone();
            let cancel = cancel.clone();
            let target_id = target.id.clone();
            let handle = tokio::spawn(async move {
                scheduler
                    .run_target(job_id, index, plan, profile, target, cancel)
                    .await;
            });
            handles.push((index, target_id, handle));
        }

        for (index, target_id, handle) in handles {
            if let Err(e) = handle.await {
                error!(job_id = %job_id, target_id = %target_id, "Target task failed: {}", e);
                self.crash_target(job_id, index, format!("target task failed: {}", e));
            }
        }

        self.complete_job(job_id).await;
    }

    async fn run_target(
        &self,
        job_id: JobId,
        index: usize,
        plan: Arc<ExecutionPlan>,
        profile: Arc<Profile>,
        target: Target,
        mut cancel: watch::Receiver<bool>,
    ) {
        let permit = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => None,
            permit = self.permits.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.abort_target(job_id, index);
            return;
        };

        if !self.start_target(job_id, index) {
            return;
        }

        let mut run = self
            .steps
            .run(plan, profile, target, self.executor.clone())
            .with_cancel(cancel);
        while let Some(result) = run.next().await {
            self.record_step(job_id, index, &result);
        }

        let outcome = run.outcome().cloned().unwrap_or(TargetOutcome {
            status: TargetStatus::Failed,
            error: Some(TargetError::Internal {
                detail: "run ended without an outcome".to_string(),
            }),
        });
        self.finish_target(job_id, index, outcome);
    }

    /// Pending -> running. False when the run was aborted in the meantime.
    fn start_target(&self, job_id: JobId, index: usize) -> bool {
        let mut registry = self.registry();
        if registry.is_cancelled(&job_id) {
            drop(registry);
            self.abort_target(job_id, index);
            return false;
        }
        let Some(job) = registry.get_mut(&job_id) else {
            return false;
        };
        let Some(run) = job.targets.get_mut(index) else {
            return false;
        };
        if run.start().is_err() {
            return false;
        }
        let target_id = run.target.id.clone();
        job.mark_running();

        debug!(job_id = %job_id, target_id = %target_id, "Target run started");
        self.bus.publish(
            ProgressEvent::new(job_id, EventStatus::Target(TargetStatus::Running))
                .with_target(target_id),
        );
        true
    }

    fn record_step(&self, job_id: JobId, index: usize, result: &StepResult) {
        let target_id = {
            let mut registry = self.registry();
            let Some(run) = registry
                .get_mut(&job_id)
                .and_then(|j| j.targets.get_mut(index))
            else {
                return;
            };
            run.record(result);
            run.target.id.clone()
        };

        self.bus.publish(
            ProgressEvent::new(job_id, EventStatus::Step(result.status))
                .with_target(target_id)
                .with_step(result.kind, result.attempt)
                .with_detail(result.detail.clone()),
        );
    }

    fn finish_target(&self, job_id: JobId, index: usize, outcome: TargetOutcome) {
        let mut registry = self.registry();
        let Some(run) = registry
            .get_mut(&job_id)
            .and_then(|j| j.targets.get_mut(index))
        else {
            return;
        };

        let status = outcome.status;
        if let Err(e) = run.finish(outcome) {
            warn!(job_id = %job_id, target_id = %run.target.id, "Cannot finish target run: {}", e);
            return;
        }

        let detail = run.error().map(|e| e.to_string());
        match status {
            TargetStatus::Succeeded => {
                info!(job_id = %job_id, target_id = %run.target.id, "Target succeeded")
            }
            _ => warn!(
                job_id = %job_id,
                target_id = %run.target.id,
                status = %status,
                error = detail.as_deref().unwrap_or_default(),
                "Target did not succeed"
            ),
        }

        self.bus.publish(
            ProgressEvent::new(job_id, EventStatus::Target(status))
                .with_target(run.target.id.clone())
                .with_detail(detail),
        );
    }

    /// Abort a target that never started. No-op when it is already terminal.
    fn abort_target(&self, job_id: JobId, index: usize) {
        let mut registry = self.registry();
        let Some(run) = registry
            .get_mut(&job_id)
            .and_then(|j| j.targets.get_mut(index))
        else {
            return;
        };
        if run.is_terminal() || run.abort().is_err() {
            return;
        }
        debug!(job_id = %job_id, target_id = %run.target.id, "Target run aborted");
        self.bus.publish(
            ProgressEvent::new(job_id, EventStatus::Target(TargetStatus::Aborted))
                .with_target(run.target.id.clone()),
        );
    }

    fn crash_target(&self, job_id: JobId, index: usize, detail: String) {
        let mut registry = self.registry();
        let Some(run) = registry
            .get_mut(&job_id)
            .and_then(|j| j.targets.get_mut(index))
        else {
            return;
        };
        if run.is_terminal() {
            return;
        }
        if run.fail(TargetError::Internal { detail: detail.clone() }).is_err() {
            return;
        }
        self.bus.publish(
            ProgressEvent::new(job_id, EventStatus::Target(TargetStatus::Failed))
                .with_target(run.target.id.clone())
                .with_detail(Some(detail)),
        );
    }

    async fn complete_job(&self, job_id: JobId) {
        let job = {
            let mut registry = self.registry();
            let Some(job) = registry.get_mut(&job_id) else {
                return;
            };
            let status = job.complete();
            let snapshot = job.clone();

            self.bus.publish(
                ProgressEvent::new(job_id, EventStatus::JobCompleted { final_status: status })
                    .with_detail(snapshot.diagnostic.clone()),
            );
            self.bus.close(&job_id);
            snapshot
        };

        info!(
            job_id = %job_id,
            status = %job.status,
            diagnostic = job.diagnostic.as_deref().unwrap_or_default(),
            "Job completed"
        );

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(&job).await {
                warn!(job_id = %job_id, "Failed to write audit record: {}", e);
            }
        }

        // Waiters are released only once the audit record is on disk
        self.registry().mark_done(&job_id, job.status);
    }

    /// Cancel a job.
    ///
    /// Targets still waiting for admission are aborted immediately; running
    /// targets stop after their in-flight step.
    pub fn cancel(&self, job_id: &JobId) -> Result<(), RolloutError> {
        let mut registry = self.registry();
        if !registry.signal_cancel(job_id) {
            return Err(RolloutError::NotFound(format!("job {}", job_id)));
        }
        let Some(job) = registry.get_mut(job_id) else {
            return Ok(());
        };
        if job.is_terminal() {
            return Ok(());
        }

        info!(job_id = %job_id, "Cancelling job");
        for run in job.targets.iter_mut() {
            if run.status() != TargetStatus::Pending || run.abort().is_err() {
                continue;
            }
            self.bus.publish(
                ProgressEvent::new(*job_id, EventStatus::Target(TargetStatus::Aborted))
                    .with_target(run.target.id.clone()),
            );
        }
        Ok(())
    }

    /// Current state of a job
    pub fn snapshot(&self, job_id: &JobId) -> Option<Job> {
        self.registry().get(job_id).cloned()
    }

    /// Every retained job, oldest first
    pub fn list_jobs(&self) -> Vec<Job> {
        self.registry().list()
    }

    /// Wait for a job to reach a terminal status
    pub async fn wait(&self, job_id: &JobId) -> Result<JobStatus, RolloutError> {
        let mut done = self
            .registry()
            .done_receiver(job_id)
            .ok_or_else(|| RolloutError::NotFound(format!("job {}", job_id)))?;

        let status = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| RolloutError::Internal(format!("job {} was dropped", job_id)))?;
        (*status).ok_or_else(|| RolloutError::Internal(format!("job {} has no status", job_id)))
    }

    /// Drop terminal jobs past the retention window, together with their
    /// progress history
    pub fn evict_expired(&self) -> usize {
        let evicted = self.registry().evict_expired(Utc::now());
        for job_id in &evicted {
            self.bus.remove(job_id);
            debug!(job_id = %job_id, "Evicted job");
        }
        evicted.len()
    }
}

/// Resolves once cancellation is requested; never if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}
