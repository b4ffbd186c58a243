//! Operating system families and their installation rules

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Archive format of an installation artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Infer the format from an artifact file name
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }

    /// File extension including the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => ".tar.gz",
            ArchiveFormat::Zip => ".zip",
        }
    }
}

/// Where environment assignments are persisted on a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvScope {
    /// `/etc/environment` plus a profile script
    SystemFile,
    /// Machine-level environment (registry)
    Machine,
}

/// The closed set of target operating system families.
///
/// Every OS-specific decision the planner makes is answered here, so call
/// sites never branch on the family themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
    Aix,
}

impl OsFamily {
    pub const ALL: [OsFamily; 3] = [OsFamily::Linux, OsFamily::Windows, OsFamily::Aix];

    /// Symlinks need elevated privileges on Windows, which are not assumed.
    pub fn supports_symlinks(&self) -> bool {
        !matches!(self, OsFamily::Windows)
    }

    /// Default artifact format when the file name does not say
    pub fn default_archive_format(&self) -> ArchiveFormat {
        match self {
            OsFamily::Windows => ArchiveFormat::Zip,
            OsFamily::Linux | OsFamily::Aix => ArchiveFormat::TarGz,
        }
    }

    /// Directory artifacts are copied into before unpacking
    pub fn staging_dir(&self) -> &'static str {
        match self {
            OsFamily::Windows => "C:\\temp",
            OsFamily::Linux | OsFamily::Aix => "/tmp",
        }
    }

    pub fn path_separator(&self) -> char {
        match self {
            OsFamily::Windows => '\\',
            OsFamily::Linux | OsFamily::Aix => '/',
        }
    }

    /// Join path segments with this family's separator
    pub fn join(&self, base: &str, child: &str) -> String {
        let sep = self.path_separator();
        let base = base.trim_end_matches(sep);
        let child = child.trim_start_matches(sep);
        format!("{}{}{}", base, sep, child)
    }

    /// Path of the java launcher inside an install directory
    pub fn java_binary(&self, install_path: &str) -> String {
        match self {
            OsFamily::Windows => self.join(install_path, "bin\\java.exe"),
            OsFamily::Linux | OsFamily::Aix => self.join(install_path, "bin/java"),
        }
    }

    pub fn env_scope(&self) -> EnvScope {
        match self {
            OsFamily::Windows => EnvScope::Machine,
            OsFamily::Linux | OsFamily::Aix => EnvScope::SystemFile,
        }
    }

    /// Unpack command for an archive, extracting into `destination`
    pub fn unpack_command(&self, format: ArchiveFormat, archive: &str, destination: &str) -> String {
        match (self, format) {
            (OsFamily::Windows, ArchiveFormat::Zip) => format!(
                "Expand-Archive -Path \"{}\" -DestinationPath \"{}\" -Force",
                archive, destination
            ),
            (OsFamily::Windows, ArchiveFormat::TarGz) => {
                format!("tar -xzf \"{}\" -C \"{}\"", archive, destination)
            }
            (_, ArchiveFormat::TarGz) => format!(
                "tar -xzf {} -C {} --strip-components=1",
                archive, destination
            ),
            (_, ArchiveFormat::Zip) => format!("unzip -o {} -d {}", archive, destination),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Linux => "linux",
            OsFamily::Windows => "windows",
            OsFamily::Aix => "aix",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OsFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linux" => Ok(OsFamily::Linux),
            "windows" | "win" => Ok(OsFamily::Windows),
            "aix" => Ok(OsFamily::Aix),
            _ => Err(format!("Invalid OS family: {}", s)),
        }
    }
}
