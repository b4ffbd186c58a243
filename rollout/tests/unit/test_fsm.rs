//! FSM unit tests

use rollout::deploy::fsm::{TargetError, TargetEvent, TargetFsm, TargetStatus};
use rollout::plan::StepKind;

#[test]
fn test_fsm_initial_state() {
    let fsm = TargetFsm::new();
    assert_eq!(fsm.status(), TargetStatus::Pending);
    assert!(fsm.error().is_none());
    assert!(!fsm.is_terminal());
}

#[test]
fn test_fsm_degraded_flow() {
    let mut fsm = TargetFsm::new();

    // Pending -> Running
    fsm.process(TargetEvent::Start).unwrap();
    assert_eq!(fsm.status(), TargetStatus::Running);

    // Running -> Partial
    let error = TargetError::Degraded {
        steps: vec![StepKind::ConfigureEnv, StepKind::CreateSymlink],
    };
    fsm.process(TargetEvent::Degrade(error.clone())).unwrap();
    assert_eq!(fsm.status(), TargetStatus::Partial);
    assert_eq!(fsm.error(), Some(&error));
    assert_eq!(
        error.to_string(),
        "Non-critical step(s) failed: configure-env, create-symlink"
    );
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = TargetFsm::new();

    fsm.process(TargetEvent::Start).unwrap();
    fsm.process(TargetEvent::Fail(TargetError::StepFailed {
        step: StepKind::TransferArtifact,
        attempts: 2,
        detail: "connection reset".to_string(),
    }))
    .unwrap();

    assert_eq!(fsm.status(), TargetStatus::Failed);
    assert_eq!(
        fsm.error().unwrap().to_string(),
        "transfer-artifact failed after 2 attempt(s): connection reset"
    );
}

#[test]
fn test_fsm_abort_while_running() {
    let mut fsm = TargetFsm::new();

    fsm.process(TargetEvent::Start).unwrap();
    fsm.process(TargetEvent::Abort).unwrap();
    assert_eq!(fsm.status(), TargetStatus::Aborted);
    assert_eq!(fsm.error(), Some(&TargetError::Cancelled));
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = TargetFsm::new();

    // Cannot degrade from Pending
    let result = fsm.process(TargetEvent::Degrade(TargetError::Degraded { steps: vec![] }));
    assert!(result.is_err());

    // Cannot start twice
    fsm.process(TargetEvent::Start).unwrap();
    assert!(fsm.process(TargetEvent::Start).is_err());
    assert_eq!(fsm.status(), TargetStatus::Running);
}

#[test]
fn test_fsm_serializes_status_and_error() {
    let mut fsm = TargetFsm::new();
    fsm.process(TargetEvent::Start).unwrap();
    fsm.process(TargetEvent::Fail(TargetError::BackupFailed {
        detail: "disk full".to_string(),
    }))
    .unwrap();

    let value = serde_json::to_value(&fsm).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "status": "failed",
            "error": { "kind": "backup_failed", "detail": "disk full" }
        })
    );
}
