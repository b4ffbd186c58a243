//! Error types for rollout

use thiserror::Error;

use crate::models::OsFamily;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum RolloutError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Executor error: {0}")]
    ExecutorError(String),

    #[error("Logging error: {0}")]
    LoggingError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for RolloutError {
    fn from(err: anyhow::Error) -> Self {
        RolloutError::Internal(err.to_string())
    }
}

/// Errors raised while validating definitions or a submission.
///
/// A `ConfigError` is always reported before any remote action is taken.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown installation: {0}")]
    UnknownInstallation(String),

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("Installation {installation_id} is {os}, which profile {profile_id} does not support")]
    IncompatibleOs {
        installation_id: String,
        profile_id: String,
        os: OsFamily,
    },

    #[error("Target {target_id} is {target_os} but installation {installation_id} is {installation_os}")]
    TargetOsMismatch {
        target_id: String,
        target_os: OsFamily,
        installation_id: String,
        installation_os: OsFamily,
    },

    #[error("Submission contains no targets")]
    NoTargets,

    #[error("Duplicate target: {0}")]
    DuplicateTarget(String),

    #[error("Invalid definition {id}: {reason}")]
    InvalidDefinition { id: String, reason: String },
}

impl ConfigError {
    /// True for errors caused by an OS pairing that cannot work
    pub fn is_incompatible_os(&self) -> bool {
        matches!(
            self,
            ConfigError::IncompatibleOs { .. } | ConfigError::TargetOsMismatch { .. }
        )
    }

    /// True for errors caused by an id that is not defined
    pub fn is_unknown_id(&self) -> bool {
        matches!(
            self,
            ConfigError::UnknownInstallation(_) | ConfigError::UnknownProfile(_)
        )
    }
}
