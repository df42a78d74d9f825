//! FSM unit tests

use flowerctl::deploy::fsm::{InstallEvent, InstallFsm, InstallState};

#[test]
fn test_fsm_initial_state() {
    let fsm = InstallFsm::new();
    assert_eq!(fsm.state(), InstallState::Pending);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.history(), &[InstallState::Pending]);
}

#[test]
fn test_fsm_install_success_flow() {
    let mut fsm = InstallFsm::new();

    fsm.process(InstallEvent::Start).unwrap();
    assert_eq!(fsm.state(), InstallState::Probing);

    fsm.process(InstallEvent::Probed).unwrap();
    fsm.process(InstallEvent::Provisioned).unwrap();
    assert_eq!(fsm.state(), InstallState::Rendering);

    fsm.process(InstallEvent::ProxyApplied).unwrap();
    assert_eq!(fsm.state(), InstallState::ProxyApplied);

    fsm.process(InstallEvent::TlsFinished).unwrap();
    fsm.process(InstallEvent::AuthFinished).unwrap();
    fsm.process(InstallEvent::ServiceStarted).unwrap();
    assert_eq!(fsm.state(), InstallState::ServiceRunning);

    fsm.process(InstallEvent::Finish).unwrap();
    assert_eq!(fsm.state(), InstallState::Done);
}

#[test]
fn test_fsm_failure_during_service_rolls_back() {
    let mut fsm = InstallFsm::new();
    for event in [
        InstallEvent::Start,
        InstallEvent::Probed,
        InstallEvent::Provisioned,
        InstallEvent::ProxyApplied,
        InstallEvent::TlsFinished,
        InstallEvent::AuthFinished,
    ] {
        fsm.process(event).unwrap();
    }

    fsm.process(InstallEvent::Fail("unit did not start".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), InstallState::RollingBack);
    assert_eq!(fsm.error(), Some("unit did not start"));

    fsm.process(InstallEvent::RollbackFinished).unwrap();
    assert_eq!(fsm.state(), InstallState::RolledBack);
    assert!(fsm.state().is_terminal());
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = InstallFsm::new();

    // Can't skip probing
    assert!(fsm.process(InstallEvent::Provisioned).is_err());
    assert_eq!(fsm.state(), InstallState::Pending);

    fsm.process(InstallEvent::Start).unwrap();
    assert!(fsm.process(InstallEvent::Finish).is_err());
    assert!(fsm.process(InstallEvent::RollbackFinished).is_err());
}

#[test]
fn test_fsm_terminal_states_reject_events() {
    let mut fsm = InstallFsm::new();
    fsm.process(InstallEvent::Start).unwrap();
    fsm.process(InstallEvent::Fail("no web server".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), InstallState::Failed);

    assert!(fsm.process(InstallEvent::Start).is_err());
    assert!(fsm.process(InstallEvent::Fail("again".to_string())).is_err());
}

#[test]
fn test_fsm_uninstall_flow() {
    let mut fsm = InstallFsm::new();
    fsm.process(InstallEvent::Uninstall).unwrap();
    assert_eq!(fsm.state(), InstallState::Uninstalling);

    fsm.process(InstallEvent::UninstallFinished).unwrap();
    assert_eq!(fsm.state(), InstallState::Uninstalled);
    assert_eq!(
        fsm.history(),
        &[
            InstallState::Pending,
            InstallState::Uninstalling,
            InstallState::Uninstalled
        ]
    );
}

#[test]
fn test_state_display() {
    assert_eq!(InstallState::RollingBack.to_string(), "rolling back");
}
