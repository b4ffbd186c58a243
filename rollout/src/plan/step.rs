//! Execution plan steps

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{ArchiveFormat, EnvScope, EnvVar, OsFamily};

/// The kinds of step a plan can contain, in plan order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    VerifyArtifact,
    BackupExisting,
    TransferArtifact,
    UnpackArtifact,
    ConfigureEnv,
    CreateSymlink,
    VerifyResult,
}

impl StepKind {
    /// Fixed plan order. Verification precedes backup so a corrupt artifact
    /// never triggers a destructive overwrite.
    pub const ORDER: [StepKind; 7] = [
        StepKind::VerifyArtifact,
        StepKind::BackupExisting,
        StepKind::TransferArtifact,
        StepKind::UnpackArtifact,
        StepKind::ConfigureEnv,
        StepKind::CreateSymlink,
        StepKind::VerifyResult,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StepKind::VerifyArtifact => "verify-artifact",
            StepKind::BackupExisting => "backup-existing",
            StepKind::TransferArtifact => "transfer-artifact",
            StepKind::UnpackArtifact => "unpack-artifact",
            StepKind::ConfigureEnv => "configure-env",
            StepKind::CreateSymlink => "create-symlink",
            StepKind::VerifyResult => "verify-result",
        }
    }

    /// What happens when this step fails
    pub fn policy(&self) -> StepPolicy {
        match self {
            StepKind::VerifyArtifact | StepKind::BackupExisting => StepPolicy::FailFast,
            StepKind::TransferArtifact | StepKind::UnpackArtifact => StepPolicy::Retry,
            StepKind::ConfigureEnv | StepKind::CreateSymlink => StepPolicy::BestEffort,
            StepKind::VerifyResult => StepPolicy::Acceptance,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Failure handling for a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Abort the target immediately
    FailFast,
    /// Retry up to the configured bound, then abort
    Retry,
    /// Log and continue; the target ends `partial`
    BestEffort,
    /// The authoritative acceptance check; failure fails the target
    Acceptance,
}

/// Concrete parameters for a step, already specialised for the OS family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    VerifyArtifact {
        artifact: String,
        checksum: String,
        size_mb: u64,
    },
    BackupExisting {
        install_path: String,
        backup_dir: String,
        format: ArchiveFormat,
        /// Filled in per attempt by the backup manager
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<String>,
    },
    TransferArtifact {
        source: String,
        destination: String,
    },
    UnpackArtifact {
        archive: String,
        destination: String,
        command: String,
    },
    ConfigureEnv {
        scope: EnvScope,
        variables: Vec<EnvVar>,
    },
    CreateSymlink {
        source: String,
        link: String,
    },
    VerifyResult {
        command: String,
    },
}

/// One step of an execution plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub kind: StepKind,
    pub description: String,
    #[serde(flatten)]
    pub action: StepAction,
}

impl Step {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// An immutable, ordered list of steps for one
/// (installation, profile, OS family) combination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub installation_id: String,
    pub profile_id: String,
    pub os: OsFamily,
    pub steps: Vec<Step>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, kind: StepKind) -> bool {
        self.steps.iter().any(|s| s.kind == kind)
    }

    pub fn kinds(&self) -> Vec<StepKind> {
        self.steps.iter().map(|s| s.kind).collect()
    }
}
