//! Per-job audit records

use tracing::debug;

use crate::errors::RolloutError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::scheduler::job::{Job, JobId};

/// Writes one JSON document per finished job
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: Dir,
}

impl AuditLog {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    pub fn file_for(&self, job_id: &JobId) -> File {
        self.dir.file(&format!("job_{}.json", job_id))
    }

    /// Persist the final snapshot of `job`
    pub async fn record(&self, job: &Job) -> Result<File, RolloutError> {
        let file = self.file_for(&job.id);
        file.write_json(job).await?;
        debug!(job_id = %job.id, path = %file.path().display(), "Audit record written");
        Ok(file)
    }
}
