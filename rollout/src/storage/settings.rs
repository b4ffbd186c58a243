//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;
use crate::scheduler::job::FailurePolicy;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write a daily rolling log file into the log directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Scheduling and step execution
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Maximum cached execution plans
    #[serde(default = "default_plan_cache_capacity")]
    pub plan_cache_capacity: usize,

    /// Write a JSON record of every finished job to the log directory
    #[serde(default = "default_true")]
    pub audit_log: bool,
}

fn default_true() -> bool {
    true
}

fn default_plan_cache_capacity() -> usize {
    64
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            scheduler: SchedulerSettings::default(),
            plan_cache_capacity: default_plan_cache_capacity(),
            audit_log: true,
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Maximum target runs executing at once, across all jobs
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_target_runs: usize,

    /// Per-step timeout in seconds
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Retries for transfer and unpack steps
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Fixed delay between retries in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// How long finished jobs stay queryable, in seconds
    #[serde(default = "default_retention")]
    pub job_retention_secs: u64,

    /// How often expired jobs are evicted, in seconds
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,

    /// Failure policy for jobs that do not specify one
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_step_timeout() -> u64 {
    300
}

fn default_retry_count() -> u32 {
    1
}

fn default_retry_delay() -> u64 {
    2_000
}

fn default_retention() -> u64 {
    3_600
}

fn default_eviction_interval() -> u64 {
    60
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_target_runs: default_max_concurrent(),
            step_timeout_secs: default_step_timeout(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay(),
            job_retention_secs: default_retention(),
            eviction_interval_secs: default_eviction_interval(),
            failure_policy: FailurePolicy::default(),
        }
    }
}
