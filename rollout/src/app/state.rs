//! Application state management

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::audit::AuditLog;
use crate::config::source::DefinitionSource;
use crate::config::store::{Catalog, ConfigStore};
use crate::deploy::executor::RemoteExecutor;
use crate::errors::{ConfigError, RolloutError};
use crate::plan::{ExecutionPlan, PlanCache};
use crate::progress::bus::{ProgressBus, Subscription};
use crate::scheduler::{Job, JobId, JobScheduler, JobStatus, SubmitRequest};
use crate::workers::janitor;

/// The orchestrator: definitions, plans, scheduling and progress wired
/// together behind one handle.
pub struct Orchestrator {
    /// Installation and profile definitions
    pub config: Arc<ConfigStore>,

    /// Built execution plans
    pub plans: Arc<PlanCache>,

    /// Progress events per job
    pub bus: Arc<ProgressBus>,

    /// Job scheduler
    pub scheduler: JobScheduler,

    shutdown_tx: broadcast::Sender<()>,
    janitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Load definitions and start background workers
    pub async fn init(
        options: &AppOptions,
        source: Arc<dyn DefinitionSource>,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Result<Self, RolloutError> {
        info!("Initializing orchestrator...");

        let config = Arc::new(ConfigStore::load(source).await?);
        let plans = Arc::new(PlanCache::new(options.plan_cache_capacity));
        let bus = Arc::new(ProgressBus::new());

        let mut scheduler = JobScheduler::new(
            options.scheduler.clone(),
            config.clone(),
            plans.clone(),
            bus.clone(),
            executor,
        );
        if options.audit_log {
            scheduler = scheduler.with_audit_log(AuditLog::new(options.layout.logs_dir()));
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let janitor_handle = if options.enable_janitor {
            Some(init_janitor_worker(
                options.janitor.clone(),
                scheduler.clone(),
                shutdown_tx.subscribe(),
            ))
        } else {
            None
        };

        Ok(Self {
            config,
            plans,
            bus,
            scheduler,
            shutdown_tx,
            janitor_handle: Mutex::new(janitor_handle),
        })
    }

    pub fn submit(&self, request: SubmitRequest) -> Result<JobId, ConfigError> {
        self.scheduler.submit(request)
    }

    pub fn cancel(&self, job_id: &JobId) -> Result<(), RolloutError> {
        self.scheduler.cancel(job_id)
    }

    /// Progress for a job, from its first event
    pub fn subscribe(&self, job_id: &JobId) -> Option<Subscription> {
        self.bus.subscribe(job_id)
    }

    pub fn snapshot(&self, job_id: &JobId) -> Option<Job> {
        self.scheduler.snapshot(job_id)
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.scheduler.list_jobs()
    }

    pub async fn wait(&self, job_id: &JobId) -> Result<JobStatus, RolloutError> {
        self.scheduler.wait(job_id).await
    }

    /// The plan a submission for this pair would run
    pub fn plan(
        &self,
        installation_id: &str,
        profile_id: &str,
    ) -> Result<Arc<ExecutionPlan>, ConfigError> {
        let pair = self.config.resolve(installation_id, profile_id)?;
        Ok(self.plans.get_or_build(&pair))
    }

    /// Reload definitions. Running jobs keep the plan they started with.
    pub async fn refresh_definitions(&self) -> Result<Arc<Catalog>, RolloutError> {
        let catalog = self.config.refresh().await?;
        self.plans.clear();
        Ok(catalog)
    }

    /// Stop background workers
    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator...");
        let _ = self.shutdown_tx.send(());

        let handle = self
            .janitor_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Janitor worker did not shut down cleanly: {}", e);
            }
        }
    }
}

fn init_janitor_worker(
    options: janitor::Options,
    scheduler: JobScheduler,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    info!("Initializing janitor worker...");

    tokio::spawn(async move {
        janitor::run(
            &options,
            &scheduler,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    })
}
