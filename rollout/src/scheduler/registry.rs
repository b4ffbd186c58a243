//! In-memory job registry

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::scheduler::job::{Job, JobId, JobStatus};

struct JobEntry {
    job: Job,
    cancel_tx: watch::Sender<bool>,
    done_tx: watch::Sender<Option<JobStatus>>,
}

/// Owns every job known to the scheduler, plus the channels used to cancel
/// a job and to await its completion.
pub struct JobRegistry {
    jobs: HashMap<JobId, JobEntry>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: HashMap::new(),
            retention,
        }
    }

    /// Register a job, returning its cancellation receiver
    pub fn insert(&mut self, job: Job) -> watch::Receiver<bool> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, _) = watch::channel(None);
        self.jobs.insert(
            job.id,
            JobEntry {
                job,
                cancel_tx,
                done_tx,
            },
        );
        cancel_rx
    }

    pub fn get(&self, job_id: &JobId) -> Option<&Job> {
        self.jobs.get(job_id).map(|e| &e.job)
    }

    pub fn get_mut(&mut self, job_id: &JobId) -> Option<&mut Job> {
        self.jobs.get_mut(job_id).map(|e| &mut e.job)
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Snapshot of every job, oldest first
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().map(|e| e.job.clone()).collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Raise the cancellation flag. Returns false for unknown jobs.
    pub fn signal_cancel(&self, job_id: &JobId) -> bool {
        match self.jobs.get(job_id) {
            Some(entry) => {
                entry.cancel_tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, job_id: &JobId) -> bool {
        self.jobs
            .get(job_id)
            .map(|e| *e.cancel_tx.borrow())
            .unwrap_or(false)
    }

    /// Receiver that reads `Some(status)` once the job is terminal
    pub fn done_receiver(&self, job_id: &JobId) -> Option<watch::Receiver<Option<JobStatus>>> {
        self.jobs.get(job_id).map(|e| e.done_tx.subscribe())
    }

    pub fn mark_done(&self, job_id: &JobId, status: JobStatus) {
        if let Some(entry) = self.jobs.get(job_id) {
            entry.done_tx.send_replace(Some(status));
        }
    }

    /// Remove terminal jobs completed more than the retention window before
    /// `now`. Jobs whose waiters have not been released yet are kept.
    /// Returns the removed ids.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> Vec<JobId> {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::MAX);

        let expired: Vec<JobId> = self
            .jobs
            .values()
            .filter(|e| e.job.is_terminal() && e.done_tx.borrow().is_some())
            .filter(|e| match e.job.completed_at {
                Some(completed) => now.signed_duration_since(completed) >= retention,
                None => false,
            })
            .map(|e| e.job.id)
            .collect();

        for id in &expired {
            self.jobs.remove(id);
        }
        expired
    }
}
