use super::*;
use gridexec_core::FakeClock;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn new_store_persists_not_started() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("status.json");
    let store = StatusStore::new(&path, "./work_dir/", 8080).unwrap();

    let on_disk: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk["status"], "NOT_STARTED");
    assert_eq!(store.current().status_name(), "NOT_STARTED");
}

#[test]
fn valid_transition_sequence_persists_each_step() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("status.json");
    let store = StatusStore::new(&path, "./work_dir/", 8080).unwrap();
    let clock = FakeClock::new(100.0);

    store.set_running(&clock).unwrap();
    assert_eq!(store.current().status_name(), "RUNNING");

    clock.advance(5.0);
    let final_record = store.set_exited(&clock, 100.0, 0, 4096).unwrap();
    assert_eq!(final_record.status_name(), "EXITED");

    let on_disk: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk["exitCode"], 0);
    assert_eq!(on_disk["workDirSize"], 4096);
}

#[test]
fn skipping_running_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("status.json");
    let store = StatusStore::new(&path, "./work_dir/", 8080).unwrap();
    let clock = FakeClock::new(100.0);

    let err = store.set_exited(&clock, 100.0, 0, 0).unwrap_err();
    assert!(matches!(err, StatusError::InvalidTransition { .. }));
}

#[test]
fn terminal_state_is_sticky() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("status.json");
    let store = StatusStore::new(&path, "./work_dir/", 8080).unwrap();
    let clock = FakeClock::new(100.0);

    store.set_running(&clock).unwrap();
    store.set_exited(&clock, 100.0, 0, 0).unwrap();

    let err = store.set_signalled(&clock, 100.0, 9, 0).unwrap_err();
    assert!(matches!(err, StatusError::InvalidTransition { .. }));
}

#[tokio::test]
async fn wait_for_terminal_returns_immediately_once_already_terminal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("status.json");
    let store = StatusStore::new(&path, "./work_dir/", 8080).unwrap();
    let clock = FakeClock::new(100.0);

    store.set_running(&clock).unwrap();
    store.set_exited(&clock, 100.0, 7, 0).unwrap();

    let record = tokio::time::timeout(std::time::Duration::from_millis(50), store.wait_for_terminal())
        .await
        .expect("wait_for_terminal did not resolve for an already-terminal store");
    assert_eq!(record.status_name(), "EXITED");
}

#[tokio::test]
async fn wait_for_terminal_wakes_on_a_later_transition() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("status.json");
    let store = Arc::new(StatusStore::new(&path, "./work_dir/", 8080).unwrap());
    let clock = FakeClock::new(100.0);
    store.set_running(&clock).unwrap();

    let waiter = {
        let store = store.clone();
        tokio::spawn(async move { store.wait_for_terminal().await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    store.set_signalled(&clock, 100.0, 9, 0).unwrap();

    let record = tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
        .await
        .expect("wait_for_terminal never woke up")
        .unwrap();
    assert_eq!(record.status_name(), "SIGNALLED");
}
