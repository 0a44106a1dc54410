//! FSM unit tests

use convoy::deploy::fsm::{ReconcileEvent, ReconcileFsm, ReconcilePhase};

fn fsm_in(events: &[ReconcileEvent]) -> ReconcileFsm {
    let mut fsm = ReconcileFsm::new();
    for event in events {
        fsm.process(event.clone()).unwrap();
    }
    fsm
}

const TO_CONVERGING: [ReconcileEvent; 5] = [
    ReconcileEvent::Validate,
    ReconcileEvent::Register,
    ReconcileEvent::Apply,
    ReconcileEvent::Patch,
    ReconcileEvent::Wait,
];

#[test]
fn test_fsm_initial_phase() {
    let fsm = ReconcileFsm::new();
    assert_eq!(fsm.phase(), ReconcilePhase::Pending);
    assert!(fsm.error().is_none());
    assert!(!fsm.phase().is_terminal());
}

#[test]
fn test_fsm_timeout_flow() {
    let mut fsm = fsm_in(&TO_CONVERGING);

    assert_eq!(fsm.process(ReconcileEvent::Timeout), Ok(ReconcilePhase::TimedOut));
    assert!(fsm.phase().is_terminal());
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_rollback_while_converging() {
    let mut fsm = fsm_in(&TO_CONVERGING);

    fsm.process(ReconcileEvent::Fail("circuit breaker tripped".to_string()))
        .unwrap();
    assert_eq!(fsm.phase(), ReconcilePhase::Failed);
    assert_eq!(fsm.error(), Some("circuit breaker tripped"));
}

#[test]
fn test_fsm_cannot_skip_phases() {
    let mut fsm = ReconcileFsm::new();

    assert!(fsm.process(ReconcileEvent::Apply).is_err());
    assert!(fsm.process(ReconcileEvent::Wait).is_err());
    assert_eq!(fsm.phase(), ReconcilePhase::Pending);

    fsm.process(ReconcileEvent::Validate).unwrap();
    assert!(fsm.process(ReconcileEvent::Converge).is_err());
    assert_eq!(fsm.phase(), ReconcilePhase::Validated);
}

#[test]
fn test_fsm_terminal_phases_are_final() {
    let mut stable = fsm_in(&TO_CONVERGING);
    stable.process(ReconcileEvent::Converge).unwrap();
    assert!(stable.process(ReconcileEvent::Fail("late".to_string())).is_err());
    assert_eq!(stable.phase(), ReconcilePhase::Stable);

    let mut failed = fsm_in(&[ReconcileEvent::Validate]);
    failed.process(ReconcileEvent::Fail("first".to_string())).unwrap();
    assert!(failed.process(ReconcileEvent::Fail("second".to_string())).is_err());
    assert_eq!(failed.error(), Some("first"));
}

#[test]
fn test_phase_serializes_snake_case() {
    assert_eq!(
        serde_json::to_string(&ReconcilePhase::TimedOut).unwrap(),
        "\"timed_out\""
    );
}
