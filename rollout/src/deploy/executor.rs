//! Remote executor abstraction

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::RolloutError;
use crate::models::Target;
use crate::plan::{Step, StepAction};
use crate::utils::{checksum_matches, sha256_file};

/// Structured result of running one step on one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Best available description of a failure
    pub fn detail(&self) -> Option<String> {
        if self.success {
            return None;
        }
        self.error
            .clone()
            .or_else(|| (!self.stderr.is_empty()).then(|| self.stderr.trim().to_string()))
            .or_else(|| Some("step failed".to_string()))
    }
}

/// The only means of touching a target.
///
/// Implementations wrap a concrete transport (SSH, WinRM, ...). The
/// orchestrator never opens connections itself.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run one step against one target
    async fn execute(&self, target: &Target, step: &Step) -> StepOutput;

    /// Whether a Java installation already exists at `install_path`
    async fn has_existing_install(
        &self,
        target: &Target,
        install_path: &str,
    ) -> Result<bool, RolloutError>;

    /// Name used in log messages
    fn name(&self) -> &str {
        "remote"
    }
}

/// Executor that performs no remote action.
///
/// Artifact verification is real when an artifact root is configured; every
/// other step is logged and reported as successful.
#[derive(Debug, Clone, Default)]
pub struct DryRunExecutor {
    artifact_root: Option<PathBuf>,
    existing_install: bool,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify artifacts against files under `root`
    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = Some(root.into());
        self
    }

    /// Pretend every target already has an installation
    pub fn with_existing_install(mut self, existing: bool) -> Self {
        self.existing_install = existing;
        self
    }

    async fn verify_local(&self, artifact: &str, checksum: &str) -> StepOutput {
        let Some(root) = &self.artifact_root else {
            return StepOutput::ok(format!("skipped local verification of {}", artifact));
        };

        let path = root.join(artifact);
        let algorithm = checksum.split_once(':').map(|(a, _)| a).unwrap_or_default();
        if !algorithm.eq_ignore_ascii_case("sha256") {
            return StepOutput::failed(format!("unsupported checksum algorithm '{}'", algorithm));
        }

        match sha256_file(&path).await {
            Ok(digest) if checksum_matches(checksum, "sha256", &digest) => {
                StepOutput::ok(format!("{} sha256:{}", path.display(), digest))
            }
            Ok(digest) => StepOutput::failed(format!(
                "checksum mismatch for {}: expected {}, got sha256:{}",
                path.display(),
                checksum,
                digest
            )),
            Err(e) => StepOutput::failed(format!("cannot read {}: {}", path.display(), e)),
        }
    }
}

#[async_trait]
impl RemoteExecutor for DryRunExecutor {
    async fn execute(&self, target: &Target, step: &Step) -> StepOutput {
        match &step.action {
            StepAction::VerifyArtifact { artifact, checksum, .. } => {
                self.verify_local(artifact, checksum).await
            }
            action => {
                info!(target_id = %target.id, step = %step.kind, "[dry-run] {}", step.description);
                debug!(target_id = %target.id, ?action, "[dry-run] step parameters");
                StepOutput::ok(format!("dry-run: {}", step.description))
            }
        }
    }

    async fn has_existing_install(
        &self,
        _target: &Target,
        _install_path: &str,
    ) -> Result<bool, RolloutError> {
        Ok(self.existing_install)
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}
