//! Step runner tests

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;

use rollout::deploy::backup::BackupManager;
use rollout::deploy::fsm::{TargetError, TargetStatus};
use rollout::deploy::runner::{RunSettings, StepExecutor, StepResult, StepRun, StepStatus};
use rollout::models::Target;
use rollout::plan::{ExecutionPlanBuilder, StepAction, StepKind};

use crate::common::{definitions, fast_run_settings, MockExecutor};

fn step_run(
    installation: &str,
    profile: &str,
    settings: RunSettings,
    executor: Arc<MockExecutor>,
) -> StepRun {
    let defs = definitions().with_keyed_ids();
    let installation = &defs.installations[installation];
    let profile = Arc::new(defs.profiles[profile].clone());
    let plan = Arc::new(ExecutionPlanBuilder::new().build(installation, &profile));

    StepExecutor::new(settings, Arc::new(BackupManager::new())).run(
        plan,
        profile,
        Target::new("host-1", installation.os),
        executor,
    )
}

async fn drain(run: &mut StepRun) -> Vec<StepResult> {
    let mut results = Vec::new();
    while let Some(result) = run.next().await {
        results.push(result);
    }
    results
}

fn transitions(results: &[StepResult]) -> Vec<(StepKind, StepStatus)> {
    results.iter().map(|r| (r.kind, r.status)).collect()
}

#[tokio::test]
async fn test_successful_run_reports_every_step() {
    let executor = Arc::new(MockExecutor::new());
    let mut run = step_run("java21-linux", "dev-linux", fast_run_settings(), executor.clone());

    let results = drain(&mut run).await;

    let expected: Vec<(StepKind, StepStatus)> = [
        StepKind::VerifyArtifact,
        StepKind::TransferArtifact,
        StepKind::UnpackArtifact,
        StepKind::ConfigureEnv,
        StepKind::CreateSymlink,
        StepKind::VerifyResult,
    ]
    .into_iter()
    .flat_map(|k| [(k, StepStatus::Running), (k, StepStatus::Succeeded)])
    .collect();
    assert_eq!(transitions(&results), expected);

    let outcome = run.outcome().unwrap();
    assert_eq!(outcome.status, TargetStatus::Succeeded);
    assert!(outcome.error.is_none());
    assert_eq!(executor.call_count(), 6);

    // Finished runs stay finished
    assert!(run.next().await.is_none());
}

#[tokio::test]
async fn test_run_is_lazy() {
    let executor = Arc::new(MockExecutor::new());
    let mut run = step_run("java21-linux", "dev-linux", fast_run_settings(), executor.clone());
    assert_eq!(executor.call_count(), 0);

    let first = run.next().await.unwrap();
    assert_eq!((first.kind, first.status), (StepKind::VerifyArtifact, StepStatus::Running));
    assert_eq!(executor.call_count(), 0);

    run.next().await.unwrap();
    assert_eq!(executor.call_count(), 1);
}

#[tokio::test]
async fn test_transfer_retried_once_then_fails() {
    let executor = Arc::new(MockExecutor::new().failing(StepKind::TransferArtifact, 2));
    let mut run = step_run("java21-linux", "dev-linux", fast_run_settings(), executor.clone());

    let results = drain(&mut run).await;
    assert_eq!(
        transitions(&results),
        vec![
            (StepKind::VerifyArtifact, StepStatus::Running),
            (StepKind::VerifyArtifact, StepStatus::Succeeded),
            (StepKind::TransferArtifact, StepStatus::Running),
            (StepKind::TransferArtifact, StepStatus::Retrying),
            (StepKind::TransferArtifact, StepStatus::Running),
            (StepKind::TransferArtifact, StepStatus::Failed),
        ]
    );
    assert_eq!(results[4].attempt, 2);

    let outcome = run.outcome().unwrap();
    assert_eq!(outcome.status, TargetStatus::Failed);
    assert!(matches!(
        outcome.error,
        Some(TargetError::StepFailed { step: StepKind::TransferArtifact, attempts: 2, .. })
    ));
    assert!(!executor.kinds_for("host-1").contains(&StepKind::UnpackArtifact));
}

#[tokio::test]
async fn test_unpack_recovers_after_retry() {
    let executor = Arc::new(MockExecutor::new().failing(StepKind::UnpackArtifact, 1));
    let mut run = step_run("java21-linux", "dev-linux", fast_run_settings(), executor.clone());

    drain(&mut run).await;
    assert_eq!(run.outcome().unwrap().status, TargetStatus::Succeeded);
    let unpacks = executor
        .kinds_for("host-1")
        .into_iter()
        .filter(|k| *k == StepKind::UnpackArtifact)
        .count();
    assert_eq!(unpacks, 2);
}

#[tokio::test]
async fn test_verify_artifact_is_fail_fast() {
    let executor = Arc::new(MockExecutor::new().failing(StepKind::VerifyArtifact, 1));
    let mut run = step_run("java21-linux", "dev-linux", fast_run_settings(), executor.clone());

    drain(&mut run).await;
    assert_eq!(run.outcome().unwrap().status, TargetStatus::Failed);
    assert_eq!(executor.kinds_for("host-1"), vec![StepKind::VerifyArtifact]);
}

#[tokio::test]
async fn test_backup_probe_failure_aborts_before_transfer() {
    let executor = Arc::new(MockExecutor::new().with_probe_error());
    let mut run = step_run("java21-linux", "prod-linux", fast_run_settings(), executor.clone());

    let results = drain(&mut run).await;
    let last = results.last().unwrap();
    assert_eq!((last.kind, last.status), (StepKind::BackupExisting, StepStatus::Failed));

    let outcome = run.outcome().unwrap();
    assert!(matches!(outcome.error, Some(TargetError::BackupFailed { .. })));
    let kinds = executor.kinds_for("host-1");
    assert!(!kinds.contains(&StepKind::TransferArtifact));
    assert!(!kinds.contains(&StepKind::UnpackArtifact));
}

#[tokio::test]
async fn test_backup_skipped_without_existing_install() {
    let executor = Arc::new(MockExecutor::new().with_existing_install(false));
    let mut run = step_run("java21-linux", "prod-linux", fast_run_settings(), executor.clone());

    let results = drain(&mut run).await;
    assert!(results
        .iter()
        .any(|r| r.kind == StepKind::BackupExisting && r.status == StepStatus::Skipped));
    assert!(!executor.kinds_for("host-1").contains(&StepKind::BackupExisting));
    assert_eq!(executor.probe_count(), 1);
    assert_eq!(run.outcome().unwrap().status, TargetStatus::Succeeded);
}

#[tokio::test]
async fn test_backup_destination_is_filled_in() {
    let executor = Arc::new(MockExecutor::new());
    let mut run = step_run("java21-linux", "prod-linux", fast_run_settings(), executor.clone());
    drain(&mut run).await;

    let (_, backup) = executor
        .calls()
        .into_iter()
        .find(|(_, s)| s.kind == StepKind::BackupExisting)
        .unwrap();
    match backup.action {
        StepAction::BackupExisting { destination: Some(path), .. } => {
            assert!(path.starts_with("/opt/java-backup/java_backup_"));
            assert!(path.ends_with(".tar.gz"));
        }
        other => panic!("unexpected action {:?}", other),
    }
}

#[tokio::test]
async fn test_best_effort_failures_make_the_run_partial() {
    let executor = Arc::new(MockExecutor::new().failing(StepKind::ConfigureEnv, 1));
    let mut run = step_run("java21-linux", "dev-linux", fast_run_settings(), executor.clone());

    drain(&mut run).await;
    let outcome = run.outcome().unwrap();
    assert_eq!(outcome.status, TargetStatus::Partial);
    assert_eq!(
        outcome.error,
        Some(TargetError::Degraded { steps: vec![StepKind::ConfigureEnv] })
    );
    assert!(executor.kinds_for("host-1").contains(&StepKind::VerifyResult));
}

#[tokio::test]
async fn test_verify_result_failure_fails_the_run() {
    let executor = Arc::new(MockExecutor::new().failing(StepKind::VerifyResult, 1));
    let mut run = step_run("java21-linux", "dev-linux", fast_run_settings(), executor);

    drain(&mut run).await;
    let outcome = run.outcome().unwrap();
    assert_eq!(outcome.status, TargetStatus::Failed);
    assert!(matches!(outcome.error, Some(TargetError::VerificationFailed { .. })));
}

#[tokio::test]
async fn test_step_timeout_counts_as_failure() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(500)));
    let settings = RunSettings {
        step_timeout: Duration::from_millis(20),
        ..fast_run_settings()
    };
    let mut run = step_run("java21-linux", "dev-linux", settings, executor);

    let results = drain(&mut run).await;
    let failed = results.last().unwrap();
    assert_eq!(failed.kind, StepKind::VerifyArtifact);
    assert!(failed.detail.as_deref().unwrap().contains("timed out"));
    assert_eq!(run.outcome().unwrap().status, TargetStatus::Failed);
}

#[tokio::test]
async fn test_cancelled_run_stops_between_steps() {
    let executor = Arc::new(MockExecutor::new());
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut run = step_run("java21-linux", "dev-linux", fast_run_settings(), executor.clone())
        .with_cancel(cancel_rx);

    // Finish the first step, then cancel
    run.next().await.unwrap();
    run.next().await.unwrap();
    cancel_tx.send_replace(true);

    assert!(run.next().await.is_none());
    let outcome = run.outcome().unwrap();
    assert_eq!(outcome.status, TargetStatus::Aborted);
    assert_eq!(outcome.error, Some(TargetError::Cancelled));
    assert_eq!(executor.call_count(), 1);
}

#[tokio::test]
async fn test_cancel_during_last_step_aborts_the_run() {
    let executor = Arc::new(MockExecutor::new());
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut run = step_run("java21-linux", "dev-linux", fast_run_settings(), executor.clone())
        .with_cancel(cancel_rx);

    // Stop right after verify-result is announced
    loop {
        let result = run.next().await.unwrap();
        if (result.kind, result.status) == (StepKind::VerifyResult, StepStatus::Running) {
            break;
        }
    }
    cancel_tx.send_replace(true);

    let last = run.next().await.unwrap();
    assert_eq!((last.kind, last.status), (StepKind::VerifyResult, StepStatus::Succeeded));
    assert!(run.next().await.is_none());

    let outcome = run.outcome().unwrap();
    assert_eq!(outcome.status, TargetStatus::Aborted);
    assert_eq!(outcome.error, Some(TargetError::Cancelled));
    assert_eq!(executor.call_count(), 6);
}

#[tokio::test]
async fn test_failed_backup_step_stops_before_transfer() {
    let executor = Arc::new(MockExecutor::new().failing(StepKind::BackupExisting, 1));
    let mut run = step_run("java21-linux", "prod-linux", fast_run_settings(), executor.clone());

    let results = drain(&mut run).await;
    assert_eq!(
        transitions(&results),
        vec![
            (StepKind::VerifyArtifact, StepStatus::Running),
            (StepKind::VerifyArtifact, StepStatus::Succeeded),
            (StepKind::BackupExisting, StepStatus::Running),
            (StepKind::BackupExisting, StepStatus::Failed),
        ]
    );

    let outcome = run.outcome().unwrap();
    assert_eq!(outcome.status, TargetStatus::Failed);
    assert!(matches!(outcome.error, Some(TargetError::BackupFailed { .. })));
    assert_eq!(
        executor.kinds_for("host-1"),
        vec![StepKind::VerifyArtifact, StepKind::BackupExisting]
    );
}

#[tokio::test]
async fn test_windows_run_has_no_symlink_step() {
    let executor = Arc::new(MockExecutor::new());
    let run = step_run("java21-windows", "prod-windows", fast_run_settings(), executor.clone());

    let results: Vec<StepResult> = run.into_stream().collect().await;
    assert!(results.iter().all(|r| r.kind != StepKind::CreateSymlink));

    assert!(results.iter().any(|r| r.kind == StepKind::BackupExisting));
    assert!(executor.calls().iter().all(|(_, s)| s.kind != StepKind::CreateSymlink));
}
