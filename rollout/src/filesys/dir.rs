//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::RolloutError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A file inside this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), RolloutError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }
}
