//! Application configuration options

use std::time::Duration;

use crate::deploy::runner::RunSettings;
use crate::scheduler::SchedulerOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::janitor;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Scheduler configuration
    pub scheduler: SchedulerOptions,

    /// Maximum cached execution plans
    pub plan_cache_capacity: usize,

    /// Write a JSON record of every finished job
    pub audit_log: bool,

    /// Enable the retention janitor
    pub enable_janitor: bool,

    /// Janitor worker options
    pub janitor: janitor::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            scheduler: SchedulerOptions::default(),
            plan_cache_capacity: 64,
            audit_log: true,
            enable_janitor: true,
            janitor: janitor::Options::default(),
        }
    }
}

impl AppOptions {
    /// Runtime options from the settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let s = &settings.scheduler;
        Self {
            layout,
            scheduler: SchedulerOptions {
                max_concurrent_target_runs: s.max_concurrent_target_runs,
                run: RunSettings {
                    step_timeout: Duration::from_secs(s.step_timeout_secs),
                    retry_count: s.retry_count,
                    retry_delay: Duration::from_millis(s.retry_delay_ms),
                },
                job_retention: Duration::from_secs(s.job_retention_secs),
                default_failure_policy: s.failure_policy,
            },
            plan_cache_capacity: settings.plan_cache_capacity,
            audit_log: settings.audit_log,
            enable_janitor: true,
            janitor: janitor::Options {
                interval: Duration::from_secs(s.eviction_interval_secs.max(1)),
            },
        }
    }
}
