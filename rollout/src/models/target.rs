//! Remote targets

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::os::OsFamily;

/// A single remote host.
///
/// Connection parameters are opaque here; only the executor interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Host name or executor handle
    pub id: String,

    /// OS family of the host
    pub os: OsFamily,

    /// Executor-specific connection parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connection: BTreeMap<String, String>,
}

impl Target {
    pub fn new(id: impl Into<String>, os: OsFamily) -> Self {
        Self {
            id: id.into(),
            os,
            connection: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.connection.insert(key.into(), value.into());
        self
    }

    /// Parse `host:os`, e.g. `web-01:linux`
    pub fn parse(value: &str) -> Result<Self, String> {
        let (host, os) = value
            .rsplit_once(':')
            .ok_or_else(|| format!("Invalid target '{}', expected host:os", value))?;
        if host.is_empty() {
            return Err(format!("Invalid target '{}', empty host", value));
        }
        Ok(Self::new(host, os.parse()?))
    }
}
