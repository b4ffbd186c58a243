//! Read-only store of validated definitions

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::config::source::DefinitionSource;
use crate::errors::{ConfigError, RolloutError};
use crate::models::{Definitions, EnvVar, Installation, OsFamily, Profile};

/// One validated, immutable set of definitions
#[derive(Debug, Default)]
pub struct Catalog {
    /// Increases with every successful refresh
    pub generation: u64,
    pub installations: BTreeMap<String, Arc<Installation>>,
    pub profiles: BTreeMap<String, Arc<Profile>>,
}

impl Catalog {
    fn from_definitions(generation: u64, definitions: Definitions) -> Self {
        Self {
            generation,
            installations: definitions
                .installations
                .into_iter()
                .map(|(id, i)| (id, Arc::new(i)))
                .collect(),
            profiles: definitions
                .profiles
                .into_iter()
                .map(|(id, p)| (id, Arc::new(p)))
                .collect(),
        }
    }
}

/// A validated (installation, profile) pairing
#[derive(Debug, Clone)]
pub struct ResolvedPair {
    pub generation: u64,
    pub installation: Arc<Installation>,
    pub profile: Arc<Profile>,
}

/// Read-only view over installation and profile definitions.
///
/// Reads are served from an in-memory snapshot. A refresh validates the
/// whole new set before swapping it in, so readers never observe a
/// half-updated catalog.
pub struct ConfigStore {
    source: Arc<dyn DefinitionSource>,
    snapshot: RwLock<Arc<Catalog>>,
    generation: AtomicU64,
}

impl ConfigStore {
    /// Create an empty store backed by `source`. Call [`refresh`](Self::refresh)
    /// to load it.
    pub fn new(source: Arc<dyn DefinitionSource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(Catalog::default())),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a store and load it from `source`
    pub async fn load(source: Arc<dyn DefinitionSource>) -> Result<Self, RolloutError> {
        let store = Self::new(source);
        store.refresh().await?;
        Ok(store)
    }

    /// Reload definitions from the source.
    ///
    /// On any error the current snapshot is kept. A refresh overtaken by a
    /// newer one returns its catalog without installing it.
    pub async fn refresh(&self) -> Result<Arc<Catalog>, RolloutError> {
        let definitions = self.source.load().await?;
        validate(&definitions)?;
        warn_unpaired(&definitions);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let catalog = Arc::new(Catalog::from_definitions(generation, definitions));

        info!(
            source = %self.source.describe(),
            generation,
            installations = catalog.installations.len(),
            profiles = catalog.profiles.len(),
            "Definitions loaded"
        );

        // Concurrent refreshes may finish out of order; the newest generation wins
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        if catalog.generation > snapshot.generation {
            *snapshot = catalog.clone();
        }
        Ok(catalog)
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn list_installations(&self) -> Vec<Arc<Installation>> {
        self.snapshot().installations.values().cloned().collect()
    }

    pub fn list_profiles(&self) -> Vec<Arc<Profile>> {
        self.snapshot().profiles.values().cloned().collect()
    }

    /// Profiles that may be paired with the given installation
    pub fn compatible_profiles(&self, installation_id: &str) -> Result<Vec<Arc<Profile>>, ConfigError> {
        let catalog = self.snapshot();
        let installation = catalog
            .installations
            .get(installation_id)
            .ok_or_else(|| ConfigError::UnknownInstallation(installation_id.to_string()))?;
        Ok(catalog
            .profiles
            .values()
            .filter(|p| p.supports(installation.os))
            .cloned()
            .collect())
    }

    /// Look up and validate an (installation, profile) pairing
    pub fn resolve(&self, installation_id: &str, profile_id: &str) -> Result<ResolvedPair, ConfigError> {
        let catalog = self.snapshot();

        let installation = catalog
            .installations
            .get(installation_id)
            .ok_or_else(|| ConfigError::UnknownInstallation(installation_id.to_string()))?;
        let profile = catalog
            .profiles
            .get(profile_id)
            .ok_or_else(|| ConfigError::UnknownProfile(profile_id.to_string()))?;

        if !profile.supports(installation.os) {
            return Err(ConfigError::IncompatibleOs {
                installation_id: installation.id.clone(),
                profile_id: profile.id.clone(),
                os: installation.os,
            });
        }

        Ok(ResolvedPair {
            generation: catalog.generation,
            installation: installation.clone(),
            profile: profile.clone(),
        })
    }
}

fn invalid(id: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidDefinition {
        id: id.to_string(),
        reason: reason.into(),
    }
}

/// Validate a full set of definitions
pub fn validate(definitions: &Definitions) -> Result<(), ConfigError> {
    for (id, installation) in &definitions.installations {
        if id.trim().is_empty() {
            return Err(invalid(id, "empty installation id"));
        }
        if installation.filename.trim().is_empty() {
            return Err(invalid(id, "missing filename"));
        }
        match installation.checksum.split_once(':') {
            Some((algo, digest)) if !algo.is_empty() && !digest.is_empty() => {}
            _ => return Err(invalid(id, "checksum must be <algorithm>:<digest>")),
        }
    }

    for (id, profile) in &definitions.profiles {
        if id.trim().is_empty() {
            return Err(invalid(id, "empty profile id"));
        }
        if profile.install_path.trim().is_empty() {
            return Err(invalid(id, "missing install_path"));
        }
        if profile.os_compatibility.is_empty() {
            return Err(invalid(id, "os_compatibility is empty"));
        }
        if profile.backup_enabled && profile.backup_path.trim().is_empty() {
            return Err(invalid(id, "backup enabled without backup_path"));
        }
        let links_somewhere = profile
            .os_compatibility
            .iter()
            .any(OsFamily::supports_symlinks);
        if profile.symlink_enabled && links_somewhere && profile.symlink_path.trim().is_empty() {
            return Err(invalid(id, "symlink enabled without symlink_path"));
        }
        if let Some(bad) = profile
            .environment_vars
            .iter()
            .find(|a| EnvVar::parse(a).is_none())
        {
            return Err(invalid(id, format!("malformed environment assignment '{}'", bad)));
        }
    }

    Ok(())
}

fn warn_unpaired(definitions: &Definitions) {
    for installation in definitions.installations.values() {
        if !definitions.profiles.values().any(|p| p.supports(installation.os)) {
            warn!(
                installation_id = %installation.id,
                os = %installation.os,
                "No profile is compatible with installation"
            );
        }
    }
}
