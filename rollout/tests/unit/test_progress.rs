//! Progress stream tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use rollout::deploy::fsm::TargetStatus;
use rollout::deploy::runner::StepStatus;
use rollout::plan::StepKind;
use rollout::progress::bus::{EventStatus, ProgressEvent};
use rollout::scheduler::{JobStatus, SubmitRequest};

use crate::common::{linux_targets, scheduler, scheduler_options, MockExecutor};

/// Position of a step in the fixed plan order
fn order(kind: StepKind) -> usize {
    StepKind::ORDER.iter().position(|k| *k == kind).unwrap()
}

#[tokio::test]
async fn test_resubscribing_replays_identical_sequence() {
    let executor = Arc::new(MockExecutor::new());
    let scheduler = scheduler(scheduler_options(2), executor).await;

    let job_id = scheduler
        .submit(SubmitRequest::new(
            "java21-linux",
            "prod-linux",
            linux_targets(&["a", "b", "c"]),
        ))
        .unwrap();
    scheduler.wait(&job_id).await.unwrap();

    let first = scheduler.bus().subscribe(&job_id).unwrap().collect().await;
    let second = scheduler.bus().subscribe(&job_id).unwrap().collect().await;
    assert_eq!(first, second);
    assert_eq!(first, scheduler.bus().backlog(&job_id));

    let seqs: Vec<u64> = first.iter().map(|e| e.seq).collect();
    let expected: Vec<u64> = (1..=first.len() as u64).collect();
    assert_eq!(seqs, expected);

    let last = first.last().unwrap();
    assert_eq!(
        last.status,
        EventStatus::JobCompleted {
            final_status: JobStatus::Succeeded
        }
    );
    assert_eq!(first.iter().filter(|e| e.is_final()).count(), 1);
}

#[tokio::test]
async fn test_live_subscriber_sees_every_transition_in_order() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(2)));
    let scheduler = scheduler(scheduler_options(5), executor).await;

    let job_id = scheduler
        .submit(SubmitRequest::new(
            "java21-linux",
            "dev-linux",
            linux_targets(&["a", "b"]),
        ))
        .unwrap();

    // Subscribe while the job is running
    let live: Vec<ProgressEvent> = scheduler
        .bus()
        .subscribe(&job_id)
        .unwrap()
        .into_stream()
        .collect()
        .await;
    assert!(live.last().unwrap().is_final());

    let mut per_target: HashMap<String, Vec<&ProgressEvent>> = HashMap::new();
    for event in &live {
        if let Some(target) = &event.target_id {
            per_target.entry(target.clone()).or_default().push(event);
        }
    }
    assert_eq!(per_target.len(), 2);

    for events in per_target.values() {
        assert_eq!(events.first().unwrap().status, EventStatus::Target(TargetStatus::Running));
        assert_eq!(
            events.last().unwrap().status,
            EventStatus::Target(TargetStatus::Succeeded)
        );

        // Steps appear in plan order, each announced before it completes
        let steps: Vec<(StepKind, EventStatus)> = events
            .iter()
            .filter_map(|e| e.step.map(|s| (s, e.status)))
            .collect();
        assert_eq!(steps.len(), 12);
        for pair in steps.windows(2) {
            assert!(order(pair[0].0) <= order(pair[1].0));
        }
        for chunk in steps.chunks(2) {
            assert_eq!(chunk[0].1, EventStatus::Step(StepStatus::Running));
            assert_eq!(chunk[1].1, EventStatus::Step(StepStatus::Succeeded));
        }
    }
}

#[tokio::test]
async fn test_cancelled_pending_targets_emit_aborted_events() {
    let executor = Arc::new(MockExecutor::new().blocking("blocker"));
    let scheduler = scheduler(scheduler_options(1), executor.clone()).await;

    let blocker = scheduler
        .submit(SubmitRequest::new("java21-linux", "dev-linux", linux_targets(&["blocker"])))
        .unwrap();
    while executor.call_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let job_id = scheduler
        .submit(SubmitRequest::new("java21-linux", "dev-linux", linux_targets(&["a", "b"])))
        .unwrap();
    scheduler.cancel(&job_id).unwrap();
    scheduler.wait(&job_id).await.unwrap();

    let events = scheduler.bus().backlog(&job_id);
    let aborted = events
        .iter()
        .filter(|e| e.status == EventStatus::Target(TargetStatus::Aborted))
        .count();
    assert_eq!(aborted, 2);
    assert!(events.iter().all(|e| e.step.is_none()));

    executor.release();
    scheduler.wait(&blocker).await.unwrap();
}
