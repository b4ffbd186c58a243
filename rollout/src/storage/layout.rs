//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::RolloutError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the orchestrator
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Installation and profile definitions
    pub fn definitions_file(&self) -> File {
        File::new(self.base_dir.join("definitions.json"))
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Local artifacts referenced by installation filenames
    pub fn artifacts_dir(&self) -> Dir {
        Dir::new(self.base_dir.clone())
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Create the directories the orchestrator writes into
    pub async fn setup(&self) -> Result<(), RolloutError> {
        self.logs_dir().create().await
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/etc/rollout");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rollout");

        Self::new(base_dir)
    }
}
