//! Builds OS-specific execution plans

use crate::models::{EnvVar, Installation, OsFamily, Profile};
use crate::plan::step::{ExecutionPlan, Step, StepAction, StepKind};

/// Maps an (installation, profile) pair onto an ordered list of steps.
///
/// `build` is pure: identical inputs always yield an identical plan, which
/// is what makes plans safe to cache and share between jobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionPlanBuilder;

impl ExecutionPlanBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the plan for `installation` deployed with `profile`.
    ///
    /// The OS family is the installation's. Compatibility with the profile is
    /// checked by the config store before a plan is ever requested.
    pub fn build(&self, installation: &Installation, profile: &Profile) -> ExecutionPlan {
        let os = installation.os;

        let steps = StepKind::ORDER
            .iter()
            .filter(|kind| Self::applies(**kind, os, profile))
            .map(|kind| Self::step(*kind, os, installation, profile))
            .collect();

        ExecutionPlan {
            installation_id: installation.id.clone(),
            profile_id: profile.id.clone(),
            os,
            steps,
        }
    }

    fn applies(kind: StepKind, os: OsFamily, profile: &Profile) -> bool {
        match kind {
            StepKind::BackupExisting => profile.backup_enabled,
            StepKind::CreateSymlink => profile.symlink_enabled && os.supports_symlinks(),
            _ => true,
        }
    }

    fn step(kind: StepKind, os: OsFamily, installation: &Installation, profile: &Profile) -> Step {
        let staged = os.join(os.staging_dir(), installation.artifact_name());
        let java = os.java_binary(&profile.install_path);

        let (description, action) = match kind {
            StepKind::VerifyArtifact => (
                format!("Verify {} against {}", installation.filename, installation.checksum),
                StepAction::VerifyArtifact {
                    artifact: installation.filename.clone(),
                    checksum: installation.checksum.clone(),
                    size_mb: installation.size_mb,
                },
            ),
            StepKind::BackupExisting => (
                format!("Back up {} into {}", profile.install_path, profile.backup_path),
                StepAction::BackupExisting {
                    install_path: profile.install_path.clone(),
                    backup_dir: profile.backup_path.clone(),
                    format: os.default_archive_format(),
                    destination: None,
                },
            ),
            StepKind::TransferArtifact => (
                format!("Copy {} to {}", installation.artifact_name(), staged),
                StepAction::TransferArtifact {
                    source: installation.filename.clone(),
                    destination: staged.clone(),
                },
            ),
            StepKind::UnpackArtifact => {
                // An explicit install command is run from inside the destination.
                let command = match &installation.install_command {
                    Some(cmd) => format!("{} {}", cmd.trim(), staged),
                    None => os.unpack_command(
                        installation.archive_format(),
                        &staged,
                        &profile.install_path,
                    ),
                };
                (
                    format!("Unpack {} into {}", staged, profile.install_path),
                    StepAction::UnpackArtifact {
                        archive: staged.clone(),
                        destination: profile.install_path.clone(),
                        command,
                    },
                )
            }
            StepKind::ConfigureEnv => {
                let mut variables = profile.environment();
                if variables.is_empty() {
                    variables.push(EnvVar {
                        name: "JAVA_HOME".to_string(),
                        value: profile.install_path.clone(),
                    });
                }
                (
                    format!("Configure {} environment variable(s)", variables.len()),
                    StepAction::ConfigureEnv {
                        scope: os.env_scope(),
                        variables,
                    },
                )
            }
            StepKind::CreateSymlink => (
                format!("Link {} to {}", profile.symlink_path, java),
                StepAction::CreateSymlink {
                    source: java.clone(),
                    link: profile.symlink_path.clone(),
                },
            ),
            StepKind::VerifyResult => {
                let command = match os {
                    OsFamily::Windows => format!("& \"{}\" -version", java),
                    OsFamily::Linux | OsFamily::Aix => format!("{} -version", java),
                };
                (
                    format!("Verify {} {}", java, installation.version),
                    StepAction::VerifyResult { command },
                )
            }
        };

        Step {
            kind,
            description,
            action,
        }
    }
}
