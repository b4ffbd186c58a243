//! Job scheduling

pub mod job;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod scheduler;

pub use job::{FailurePolicy, Job, JobId, JobStatus, StepRecord, StepState, TargetRun};
pub use registry::JobRegistry;
pub use scheduler::{JobScheduler, SchedulerOptions, SubmitRequest};
