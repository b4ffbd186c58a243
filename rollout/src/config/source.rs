//! Backing sources for definitions

use async_trait::async_trait;

use crate::errors::RolloutError;
use crate::filesys::file::File;
use crate::models::Definitions;

/// Where the config store loads installations and profiles from.
///
/// A load must return one consistent snapshot of the definitions.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Load the current definitions
    async fn load(&self) -> Result<Definitions, RolloutError>;

    /// Short description for log messages
    fn describe(&self) -> String;
}

/// Definitions stored as a JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    file: File,
}

impl JsonFileSource {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

#[async_trait]
impl DefinitionSource for JsonFileSource {
    async fn load(&self) -> Result<Definitions, RolloutError> {
        if !self.file.exists().await {
            return Err(RolloutError::NotFound(format!(
                "definitions file {}",
                self.file.path().display()
            )));
        }
        let definitions: Definitions = self.file.read_json().await?;
        Ok(definitions.with_keyed_ids())
    }

    fn describe(&self) -> String {
        self.file.path().display().to_string()
    }
}

/// Definitions held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    definitions: Definitions,
}

impl StaticSource {
    pub fn new(definitions: Definitions) -> Self {
        Self { definitions }
    }
}

#[async_trait]
impl DefinitionSource for StaticSource {
    async fn load(&self) -> Result<Definitions, RolloutError> {
        Ok(self.definitions.clone().with_keyed_ids())
    }

    fn describe(&self) -> String {
        "static definitions".to_string()
    }
}
