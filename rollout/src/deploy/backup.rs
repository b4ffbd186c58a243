//! Backup-before-overwrite decisions

use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use crate::models::{OsFamily, Profile};

/// Decides whether and where an existing installation is archived.
#[derive(Debug, Default)]
pub struct BackupManager {
    last_stamp_ms: Mutex<i64>,
}

impl BackupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backup runs only when the profile asks for one and there is
    /// something to back up.
    pub fn should_backup(&self, profile: &Profile, target_has_existing_install: bool) -> bool {
        profile.backup_enabled && target_has_existing_install
    }

    /// Archive path for a backup taken at `timestamp`
    pub fn backup_destination(profile: &Profile, os: OsFamily, timestamp: DateTime<Utc>) -> String {
        let name = format!(
            "java_backup_{}{}",
            timestamp.format("%Y%m%dT%H%M%S%.3fZ"),
            os.default_archive_format().extension()
        );
        os.join(&profile.backup_path, &name)
    }

    /// Destination for a new backup attempt.
    ///
    /// Stamps are strictly increasing within the process, so two attempts
    /// never share a path.
    pub fn next_destination(&self, profile: &Profile, os: OsFamily) -> String {
        let now_ms = Utc::now().timestamp_millis();
        let stamp_ms = {
            let mut last = self.last_stamp_ms.lock().unwrap_or_else(|e| e.into_inner());
            let stamp = if now_ms > *last { now_ms } else { *last + 1 };
            *last = stamp;
            stamp
        };
        let timestamp = Utc
            .timestamp_millis_opt(stamp_ms)
            .single()
            .unwrap_or_else(Utc::now);
        Self::backup_destination(profile, os, timestamp)
    }
}
