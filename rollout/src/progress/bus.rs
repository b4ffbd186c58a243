//! Per-job progress event fan-out

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::trace;

use crate::deploy::fsm::TargetStatus;
use crate::deploy::runner::StepStatus;
use crate::plan::StepKind;
use crate::scheduler::job::{JobId, JobStatus};

/// What an event reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "status", rename_all = "snake_case")]
pub enum EventStatus {
    Step(StepStatus),
    Target(TargetStatus),
    JobCompleted { final_status: JobStatus },
}

/// One progress event. `seq` starts at 1 and is gapless per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub seq: u64,
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub status: EventStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProgressEvent {
    /// A new, unpublished event; the bus assigns `seq`
    pub fn new(job_id: JobId, status: EventStatus) -> Self {
        Self {
            seq: 0,
            job_id,
            target_id: None,
            step: None,
            attempt: None,
            status,
            timestamp: Utc::now(),
            detail: None,
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_step(mut self, step: StepKind, attempt: u32) -> Self {
        self.step = Some(step);
        self.attempt = Some(attempt);
        self
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    pub fn is_final(&self) -> bool {
        matches!(self.status, EventStatus::JobCompleted { .. })
    }
}

#[derive(Default)]
struct ChannelState {
    events: Vec<ProgressEvent>,
    closed: bool,
}

struct JobChannel {
    state: Mutex<ChannelState>,
    published: watch::Sender<u64>,
}

impl JobChannel {
    fn new() -> Self {
        let (published, _) = watch::channel(0);
        Self {
            state: Mutex::new(ChannelState::default()),
            published,
        }
    }
}

/// Multiplexes progress events from running jobs to any number of
/// subscribers.
///
/// Every event is kept until the job is removed, so a subscriber always
/// sees the full history of a job followed by live events.
#[derive(Default)]
pub struct ProgressBus {
    channels: Mutex<HashMap<JobId, Arc<JobChannel>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, job_id: &JobId) -> Option<Arc<JobChannel>> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.get(job_id).cloned()
    }

    /// Open the channel for a job
    pub fn open(&self, job_id: JobId) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(job_id)
            .or_insert_with(|| Arc::new(JobChannel::new()));
    }

    /// Append an event. Returns its sequence number, or `None` when the
    /// channel is unknown or already closed.
    pub fn publish(&self, mut event: ProgressEvent) -> Option<u64> {
        let channel = self.channel(&event.job_id)?;

        let seq = {
            let mut state = channel.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed {
                return None;
            }
            event.seq = state.events.len() as u64 + 1;
            trace!(job_id = %event.job_id, seq = event.seq, status = ?event.status, "Publishing event");
            state.events.push(event);
            state.events.len() as u64
        };

        channel.published.send_replace(seq);
        Some(seq)
    }

    /// Mark the job's stream as finished. Subscribers drain the backlog and
    /// then end.
    pub fn close(&self, job_id: &JobId) {
        if let Some(channel) = self.channel(job_id) {
            channel
                .state
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .closed = true;
            channel.published.send_modify(|_| {});
        }
    }

    /// Drop a job's channel. Existing subscriptions finish their backlog.
    pub fn remove(&self, job_id: &JobId) {
        self.close(job_id);
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(job_id);
    }

    /// Subscribe from the first event
    pub fn subscribe(&self, job_id: &JobId) -> Option<Subscription> {
        let channel = self.channel(job_id)?;
        let published = channel.published.subscribe();
        Some(Subscription {
            channel,
            published,
            position: 0,
        })
    }

    /// Every event published so far
    pub fn backlog(&self, job_id: &JobId) -> Vec<ProgressEvent> {
        self.channel(job_id)
            .map(|c| {
                c.state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .events
                    .clone()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An ordered read of one job's events: the backlog, then live events
/// until the job completes.
pub struct Subscription {
    channel: Arc<JobChannel>,
    published: watch::Receiver<u64>,
    position: usize,
}

impl Subscription {
    /// Next event, or `None` once the job's stream is closed and drained
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            {
                let state = self
                    .channel
                    .state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                if let Some(event) = state.events.get(self.position) {
                    self.position += 1;
                    return Some(event.clone());
                }
                if state.closed {
                    return None;
                }
            }

            // A publish after the check above bumps the version, so this
            // returns immediately instead of missing it.
            if self.published.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Read until the stream ends
    pub async fn collect(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> {
        stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}
