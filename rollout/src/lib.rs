//! Rollout Library
//!
//! Core modules for the Java runtime installation orchestrator.

pub mod app;
pub mod audit;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod plan;
pub mod progress;
pub mod scheduler;
pub mod storage;
pub mod utils;
pub mod workers;
