mod common;

use std::{fs, os::unix::fs::symlink, sync::Arc, time::Duration};

use tempfile::tempdir;
use tender::{
    config::LaunchCheck,
    error::TenderError,
    group::{ServiceGroup, ServiceOrGroup},
    identity::PidRecord,
    logs::LogFollower,
    service::{LaunchOutcome, OperationConfig},
    status::ServiceState,
    termination::StopOutcome,
};

use common::{is_alive, live_pids_mentioning, manager, service, wait_until};

#[test]
fn start_status_stop_round_trip() {
    let dir = tempdir().unwrap();
    let manager = manager(&dir.path().join("state"));
    let def = service(
        "lifecycle-echo",
        dir.path(),
        "echo booted; echo warming >&2; exec sleep 30",
        Some(LaunchCheck::LogText("booted".into())),
    );
    let op = OperationConfig::default();
    let controller = manager.controller(&def);

    assert_eq!(controller.start(&op).unwrap(), LaunchOutcome::Ready);
    let record = PidRecord::new(manager.paths(), "lifecycle-echo");
    let pid = record.load().unwrap().expect("pid recorded after launch");
    assert!(is_alive(pid));

    let log = manager.paths().log_file("lifecycle-echo");
    let mut follower = LogFollower::new(&log);
    assert!(wait_until(Duration::from_secs(5), || {
        follower.find_text("warming").unwrap_or(false)
    }));

    let targets = [ServiceOrGroup::Service(def.clone())];
    let statuses = manager.status(&targets);
    let status = statuses[0].result.as_ref().unwrap();
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.pid, Some(pid));
    assert!(status.started_at.is_some());
    assert_eq!(status.stdout_lines, 1);
    assert_eq!(status.stderr_lines, 1);

    assert_eq!(controller.stop(&op).unwrap(), StopOutcome::Stopped);
    assert!(!record.exists());
    assert!(wait_until(Duration::from_secs(5), || !is_alive(pid)));

    let statuses = manager.status(&targets);
    assert_eq!(
        statuses[0].result.as_ref().unwrap().state,
        ServiceState::Stopped
    );
    assert_eq!(controller.stop(&op).unwrap(), StopOutcome::NotRunning);
}

#[test]
fn launch_without_check_is_ready_and_reentry_is_a_no_op() {
    let dir = tempdir().unwrap();
    let manager = manager(&dir.path().join("state"));
    let def = service("lifecycle-plain", dir.path(), "exec sleep 30", None);
    let op = OperationConfig::default();
    let controller = manager.controller(&def);

    assert_eq!(controller.launch(&op).unwrap(), LaunchOutcome::Ready);
    let record = PidRecord::new(manager.paths(), "lifecycle-plain");
    let first = record.load().unwrap().unwrap();

    assert_eq!(controller.launch(&op).unwrap(), LaunchOutcome::AlreadyRunning);
    assert_eq!(record.load().unwrap(), Some(first));

    assert_eq!(controller.stop(&op).unwrap(), StopOutcome::Stopped);
}

#[test]
fn process_dying_before_ready_fails_fast() {
    let dir = tempdir().unwrap();
    let manager = manager(&dir.path().join("state"));
    let def = service(
        "lifecycle-crash",
        dir.path(),
        "echo starting; exit 3",
        Some(LaunchCheck::LogText("listening".into())),
    );

    let err = manager
        .controller(&def)
        .launch(&OperationConfig::default())
        .unwrap_err();
    assert!(matches!(err, TenderError::ServiceExited { ref service } if service == "lifecycle-crash"));
    assert!(!PidRecord::new(manager.paths(), "lifecycle-crash").exists());
}

#[test]
fn unsatisfied_check_times_out_and_leaves_process_running() {
    let dir = tempdir().unwrap();
    let mut timings = common::test_timings();
    timings.launch_timeout = Duration::from_millis(500);
    let manager = manager(&dir.path().join("state")).with_timings(timings);
    let def = service(
        "lifecycle-silent",
        dir.path(),
        "exec sleep 30",
        Some(LaunchCheck::LogText("never printed".into())),
    );
    let op = OperationConfig::default();
    let controller = manager.controller(&def);

    let err = controller.launch(&op).unwrap_err();
    assert!(matches!(err, TenderError::DidNotStart { .. }));

    let record = PidRecord::new(manager.paths(), "lifecycle-silent");
    let pid = record.load().unwrap().expect("process left running");
    assert!(is_alive(pid));

    assert_eq!(controller.stop(&op).unwrap(), StopOutcome::Stopped);
    assert!(!record.exists());
}

#[test]
fn excluded_services_are_not_launched() {
    let dir = tempdir().unwrap();
    let manager = manager(&dir.path().join("state"));
    let def = service("lifecycle-excluded", dir.path(), "exec sleep 30", None);
    let op = OperationConfig {
        exclusions: vec!["lifecycle-excluded".into()],
        skip_build: false,
    };

    let outcomes = manager.start(&[ServiceOrGroup::Service(def)], &op);
    assert!(matches!(outcomes[0].result, Ok(LaunchOutcome::Skipped)));
    assert!(!PidRecord::new(manager.paths(), "lifecycle-excluded").exists());
}

#[test]
fn unrecordable_launch_takes_its_process_group_down() {
    let dir = tempdir().unwrap();
    let manager = manager(&dir.path().join("state"));
    let def = service("lifecycle-unrecorded", dir.path(), "exec sleep 30", None);

    let pid_file = manager.paths().pid_file("lifecycle-unrecorded");
    fs::create_dir_all(pid_file.parent().unwrap()).unwrap();
    symlink(dir.path().join("missing/target.pid"), &pid_file).unwrap();

    let err = manager
        .controller(&def)
        .launch(&OperationConfig::default())
        .unwrap_err();
    assert!(matches!(err, TenderError::PidFileError(_)));
    assert!(wait_until(Duration::from_secs(5), || {
        live_pids_mentioning("lifecycle-unrecorded").is_empty()
    }));
}

#[test]
fn overlapping_targets_launch_a_shared_service_once() {
    let dir = tempdir().unwrap();
    let manager = manager(&dir.path().join("state"));
    let def = service("lifecycle-shared", dir.path(), "exec sleep 30", None);
    let group = ServiceGroup::new(
        "lifecycle-backend",
        vec![ServiceOrGroup::Service(Arc::clone(&def))],
    );
    let targets = [ServiceOrGroup::Service(def), ServiceOrGroup::Group(group)];
    let op = OperationConfig::default();

    let outcomes = manager.start(&targets, &op);
    let launches: Vec<_> = outcomes
        .iter()
        .map(|outcome| *outcome.result.as_ref().unwrap())
        .collect();
    assert_eq!(
        launches,
        vec![LaunchOutcome::Ready, LaunchOutcome::AlreadyRunning]
    );

    let stops = manager.stop(&targets, &op);
    assert!(matches!(stops[0].result, Ok(StopOutcome::Stopped)));
    assert!(matches!(stops[1].result, Ok(StopOutcome::NotRunning)));
}
