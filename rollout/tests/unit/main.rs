//! Integration tests for rollout

mod test_cache;
mod test_fsm;
mod test_progress;
mod test_runner;
mod test_scheduler;
