//! Installation and profile definitions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::os::{ArchiveFormat, OsFamily};

/// A versioned Java package available for deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    /// Unique installation ID (the key it is defined under)
    #[serde(default)]
    pub id: String,

    /// Human readable name
    pub friendly_name: String,

    /// Package version
    pub version: String,

    /// OS family the package is built for
    pub os: OsFamily,

    /// Artifact location, relative to the artifact root
    pub filename: String,

    /// Package vendor (openjdk, azul, ibm, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,

    /// Explicit unpack command, overriding the OS default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,

    /// Expected checksum, `<algorithm>:<digest>`
    pub checksum: String,

    /// Artifact size in megabytes
    #[serde(default)]
    pub size_mb: u64,
}

impl Installation {
    pub fn archive_format(&self) -> ArchiveFormat {
        ArchiveFormat::from_filename(&self.filename)
            .unwrap_or_else(|| self.os.default_archive_format())
    }

    /// Artifact file name without its directory
    pub fn artifact_name(&self) -> &str {
        self.filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.filename)
    }
}

/// A single `NAME=value` environment assignment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    /// Parse a `NAME=value` assignment
    pub fn parse(assignment: &str) -> Option<Self> {
        let (name, value) = assignment.split_once('=')?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

/// A reusable deployment policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Unique profile ID (the key it is defined under)
    #[serde(default)]
    pub id: String,

    /// Human readable name
    pub friendly_name: String,

    /// Directory the package is unpacked into
    pub install_path: String,

    /// Parent directory of the install path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,

    /// Archive the existing installation before overwriting it
    #[serde(default)]
    pub backup_enabled: bool,

    /// Directory backups are written to
    #[serde(default)]
    pub backup_path: String,

    /// Link the java launcher into a well-known location
    #[serde(default)]
    pub symlink_enabled: bool,

    /// Location of the link
    #[serde(default)]
    pub symlink_path: String,

    /// `NAME=value` assignments applied on the target
    #[serde(default)]
    pub environment_vars: Vec<String>,

    /// OS families this profile may be paired with
    pub os_compatibility: Vec<OsFamily>,
}

impl Profile {
    pub fn supports(&self, os: OsFamily) -> bool {
        self.os_compatibility.contains(&os)
    }

    /// Parsed environment assignments, skipping malformed entries
    pub fn environment(&self) -> Vec<EnvVar> {
        self.environment_vars
            .iter()
            .filter_map(|a| EnvVar::parse(a))
            .collect()
    }
}

/// The full set of definitions a store is refreshed from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Definitions {
    #[serde(default)]
    pub installations: BTreeMap<String, Installation>,

    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Definitions {
    /// Copy each map key into the record's `id` field
    pub fn with_keyed_ids(mut self) -> Self {
        for (id, installation) in self.installations.iter_mut() {
            installation.id = id.clone();
        }
        for (id, profile) in self.profiles.iter_mut() {
            profile.id = id.clone();
        }
        self
    }
}
