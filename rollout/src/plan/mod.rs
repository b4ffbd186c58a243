//! Execution planning
//!
//! Turns a validated (installation, profile) pair into an immutable,
//! OS-specific [`ExecutionPlan`]. Plans are cached per
//! (installation, profile, OS family) and shared between jobs.

pub mod builder;
pub mod cache;
pub mod step;

pub use builder::ExecutionPlanBuilder;
pub use cache::{PlanCache, PlanKey};
pub use step::{ExecutionPlan, Step, StepAction, StepKind, StepPolicy};
