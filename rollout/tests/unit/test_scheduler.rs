//! Job scheduler tests

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use rollout::audit::AuditLog;
use rollout::deploy::fsm::TargetStatus;
use rollout::errors::{ConfigError, RolloutError};
use rollout::filesys::dir::Dir;
use rollout::models::{OsFamily, Target};
use rollout::plan::StepKind;
use rollout::progress::bus::EventStatus;
use rollout::scheduler::{FailurePolicy, JobId, JobStatus, StepState, SubmitRequest};

use crate::common::{linux_targets, scheduler, scheduler_options, MockExecutor};

#[tokio::test]
async fn test_java21_linux_dev_profile_succeeds() {
    let executor = Arc::new(MockExecutor::new());
    let scheduler = scheduler(scheduler_options(5), executor.clone()).await;

    let job_id = scheduler
        .submit(SubmitRequest::new(
            "java21-linux",
            "dev-linux",
            linux_targets(&["web-01"]),
        ))
        .unwrap();
    assert_eq!(scheduler.wait(&job_id).await.unwrap(), JobStatus::Succeeded);

    let job = scheduler.snapshot(&job_id).unwrap();
    let run = job.target("web-01").unwrap();
    assert_eq!(run.status(), TargetStatus::Succeeded);
    assert_eq!(run.steps.len(), 6);
    assert!(run.steps.iter().any(|s| s.kind == StepKind::CreateSymlink));
    assert!(run.steps.iter().all(|s| s.state == StepState::Succeeded));
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert_eq!(executor.kinds_for("web-01").len(), 6);
}

#[tokio::test]
async fn test_incompatible_profile_creates_no_job() {
    let executor = Arc::new(MockExecutor::new());
    let scheduler = scheduler(scheduler_options(5), executor.clone()).await;

    let err = scheduler
        .submit(SubmitRequest::new(
            "java21-windows",
            "prod-linux",
            vec![Target::new("win-01", OsFamily::Windows)],
        ))
        .unwrap_err();

    assert!(matches!(err, ConfigError::IncompatibleOs { .. }));
    assert!(scheduler.list_jobs().is_empty());
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn test_submission_validation() {
    let executor = Arc::new(MockExecutor::new());
    let scheduler = scheduler(scheduler_options(5), executor).await;

    let err = assert_err!(scheduler.submit(SubmitRequest::new("java21-linux", "dev-linux", vec![])));
    assert_eq!(err, ConfigError::NoTargets);

    let err = assert_err!(scheduler.submit(SubmitRequest::new(
        "java21-linux",
        "dev-linux",
        linux_targets(&["a", "b", "a"]),
    )));
    assert_eq!(err, ConfigError::DuplicateTarget("a".to_string()));

    let err = assert_err!(scheduler.submit(SubmitRequest::new(
        "java21-linux",
        "dev-linux",
        vec![Target::new("aix-01", OsFamily::Aix)],
    )));
    assert!(err.is_incompatible_os());

    let err = assert_err!(scheduler.submit(SubmitRequest::new(
        "java99",
        "dev-linux",
        linux_targets(&["a"]),
    )));
    assert!(err.is_unknown_id());

    assert!(scheduler.list_jobs().is_empty());
    assert_ok!(scheduler.submit(SubmitRequest::new(
        "java17-aix",
        "dev-linux",
        vec![Target::new("aix-01", OsFamily::Aix)],
    )));
}

#[tokio::test]
async fn test_concurrency_cap_is_respected() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(15)));
    let scheduler = scheduler(scheduler_options(3), executor.clone()).await;

    let hosts: Vec<String> = (0..10).map(|i| format!("host-{:02}", i)).collect();
    let hosts: Vec<&str> = hosts.iter().map(String::as_str).collect();
    let first = scheduler
        .submit(SubmitRequest::new("java21-linux", "dev-linux", linux_targets(&hosts[..6])))
        .unwrap();
    let second = scheduler
        .submit(SubmitRequest::new("java21-linux", "dev-linux", linux_targets(&hosts[6..])))
        .unwrap();

    assert_eq!(scheduler.wait(&first).await.unwrap(), JobStatus::Succeeded);
    assert_eq!(scheduler.wait(&second).await.unwrap(), JobStatus::Succeeded);

    assert!(executor.max_in_flight() <= 3);
    assert!(executor.max_in_flight() >= 2);
    assert_eq!(executor.call_count(), 60);
}

#[tokio::test]
async fn test_cancelling_pending_job_aborts_without_remote_calls() {
    let executor = Arc::new(MockExecutor::new().blocking("blocker"));
    let scheduler = scheduler(scheduler_options(1), executor.clone()).await;

    let blocker = scheduler
        .submit(SubmitRequest::new("java21-linux", "dev-linux", linux_targets(&["blocker"])))
        .unwrap();
    while executor.call_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let job_id = scheduler
        .submit(SubmitRequest::new(
            "java21-linux",
            "dev-linux",
            linux_targets(&["a", "b", "c"]),
        ))
        .unwrap();
    scheduler.cancel(&job_id).unwrap();

    assert_eq!(scheduler.wait(&job_id).await.unwrap(), JobStatus::Partial);
    let job = scheduler.snapshot(&job_id).unwrap();
    assert!(job
        .targets
        .iter()
        .all(|t| t.status() == TargetStatus::Aborted));
    assert!(job.started_at.is_none());
    for host in ["a", "b", "c"] {
        assert!(executor.kinds_for(host).is_empty());
    }

    executor.release();
    assert_eq!(scheduler.wait(&blocker).await.unwrap(), JobStatus::Succeeded);
}

#[tokio::test]
async fn test_cancelling_running_job_finishes_in_flight_step() {
    let executor = Arc::new(MockExecutor::new().blocking("a"));
    let scheduler = scheduler(scheduler_options(5), executor.clone()).await;

    let job_id = scheduler
        .submit(SubmitRequest::new("java21-linux", "dev-linux", linux_targets(&["a"])))
        .unwrap();
    while executor.call_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    scheduler.cancel(&job_id).unwrap();
    executor.release();

    scheduler.wait(&job_id).await.unwrap();
    let job = scheduler.snapshot(&job_id).unwrap();
    let run = job.target("a").unwrap();
    assert_eq!(run.status(), TargetStatus::Aborted);
    assert_eq!(run.steps[0].state, StepState::Succeeded);
    assert!(run.steps[1..].iter().all(|s| s.state == StepState::Skipped));
    assert_eq!(executor.kinds_for("a"), vec![StepKind::VerifyArtifact]);
}

#[tokio::test]
async fn test_backup_failure_only_stops_that_job_target() {
    let executor = Arc::new(MockExecutor::new().with_probe_error());
    let scheduler = scheduler(scheduler_options(5), executor.clone()).await;

    let job_id = scheduler
        .submit(SubmitRequest::new("java21-linux", "prod-linux", linux_targets(&["db-01"])))
        .unwrap();
    assert_eq!(scheduler.wait(&job_id).await.unwrap(), JobStatus::Failed);

    let kinds = executor.kinds_for("db-01");
    assert!(!kinds.contains(&StepKind::TransferArtifact));
    assert!(!kinds.contains(&StepKind::UnpackArtifact));
}

#[tokio::test]
async fn test_transfer_failing_twice_fails_the_job() {
    let executor = Arc::new(MockExecutor::new().failing(StepKind::TransferArtifact, 2));
    let scheduler = scheduler(scheduler_options(5), executor).await;

    let job_id = scheduler
        .submit(SubmitRequest::new("java21-linux", "dev-linux", linux_targets(&["web-01"])))
        .unwrap();
    assert_eq!(scheduler.wait(&job_id).await.unwrap(), JobStatus::Failed);

    let events = scheduler.bus().subscribe(&job_id).unwrap().collect().await;
    assert!(events.iter().all(|e| !matches!(
        e.step,
        Some(StepKind::UnpackArtifact) | Some(StepKind::ConfigureEnv)
    )));
    assert!(events.iter().any(|e| e.status == EventStatus::Target(TargetStatus::Failed)));
}

#[tokio::test]
async fn test_failure_policy_decides_job_status() {
    for (policy, expected) in [
        (FailurePolicy::Strict, JobStatus::Failed),
        (FailurePolicy::ContinueOnError, JobStatus::Partial),
    ] {
        let executor = Arc::new(MockExecutor::new().failing_on("b", StepKind::VerifyResult, 1));
        let scheduler = scheduler(scheduler_options(5), executor).await;

        let job_id = scheduler
            .submit(
                SubmitRequest::new("java21-linux", "dev-linux", linux_targets(&["a", "b"]))
                    .with_failure_policy(policy),
            )
            .unwrap();
        assert_eq!(scheduler.wait(&job_id).await.unwrap(), expected);
    }
}

#[tokio::test]
async fn test_all_targets_failed_is_failed_regardless_of_policy() {
    let executor = Arc::new(MockExecutor::new().failing(StepKind::VerifyArtifact, 2));
    let scheduler = scheduler(scheduler_options(5), executor).await;

    let job_id = scheduler
        .submit(
            SubmitRequest::new("java21-linux", "dev-linux", linux_targets(&["a", "b"]))
                .with_failure_policy(FailurePolicy::ContinueOnError),
        )
        .unwrap();
    assert_eq!(scheduler.wait(&job_id).await.unwrap(), JobStatus::Failed);
    let job = scheduler.snapshot(&job_id).unwrap();
    assert_eq!(job.diagnostic.as_deref(), Some("all targets failed"));
}

#[tokio::test]
async fn test_evict_expired_drops_job_and_progress() {
    let mut options = scheduler_options(5);
    options.job_retention = Duration::ZERO;
    let scheduler = scheduler(options, Arc::new(MockExecutor::new())).await;

    let job_id = scheduler
        .submit(SubmitRequest::new("java21-linux", "dev-linux", linux_targets(&["a"])))
        .unwrap();
    scheduler.wait(&job_id).await.unwrap();

    assert_eq!(scheduler.evict_expired(), 1);
    assert!(scheduler.snapshot(&job_id).is_none());
    assert!(scheduler.bus().subscribe(&job_id).is_none());
    assert!(matches!(
        scheduler.wait(&job_id).await,
        Err(RolloutError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_unknown_job_operations() {
    let scheduler = scheduler(scheduler_options(5), Arc::new(MockExecutor::new())).await;
    let unknown = JobId::new_v4();
    assert!(scheduler.snapshot(&unknown).is_none());
    assert!(matches!(scheduler.cancel(&unknown), Err(RolloutError::NotFound(_))));
}

#[tokio::test]
async fn test_audit_record_written_on_completion() {
    let dir = tempfile::tempdir().unwrap();
    let audit = AuditLog::new(Dir::new(dir.path()));
    let scheduler = scheduler(scheduler_options(5), Arc::new(MockExecutor::new()))
        .await
        .with_audit_log(audit.clone());

    let job_id = scheduler
        .submit(SubmitRequest::new("java21-linux", "dev-linux", linux_targets(&["a"])))
        .unwrap();
    scheduler.wait(&job_id).await.unwrap();

    let value: serde_json::Value = audit.file_for(&job_id).read_json().await.unwrap();
    assert_eq!(value["status"], "succeeded");
    assert_eq!(value["targets"][0]["target"]["id"], "a");
}
