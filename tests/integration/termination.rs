mod common;

use std::{fs, time::Duration};

use tempfile::tempdir;
use tender::{
    group::ServiceOrGroup,
    identity::PidRecord,
    service::{LaunchOutcome, OperationConfig},
    status::ServiceState,
    termination::StopOutcome,
};

use common::{is_alive, manager, service, test_timings, wait_until};

#[test]
fn interrupt_ignoring_group_is_force_killed() {
    let dir = tempdir().unwrap();
    let mut timings = test_timings();
    timings.stop_grace_period = Duration::from_millis(500);
    let manager = manager(&dir.path().join("state")).with_timings(timings);
    let def = service(
        "term-stubborn",
        dir.path(),
        "trap '' INT; sleep 30 & echo $! > child.pid; wait",
        None,
    );
    let op = OperationConfig::default();
    let controller = manager.controller(&def);

    assert_eq!(controller.start(&op).unwrap(), LaunchOutcome::Ready);
    let record = PidRecord::new(manager.paths(), "term-stubborn");
    let runner_pid = record.load().unwrap().unwrap();

    let child_file = dir.path().join("child.pid");
    assert!(wait_until(Duration::from_secs(5), || {
        fs::read_to_string(&child_file).is_ok_and(|s| s.trim().parse::<u32>().is_ok())
    }));
    let child_pid: u32 = fs::read_to_string(&child_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(is_alive(child_pid));

    assert_eq!(controller.stop(&op).unwrap(), StopOutcome::Killed);
    assert!(!record.exists());
    assert!(!is_alive(runner_pid));
    assert!(wait_until(Duration::from_secs(5), || !is_alive(child_pid)));

    let statuses = manager.status(&[ServiceOrGroup::Service(def)]);
    assert_eq!(statuses[0].result.as_ref().unwrap().state, ServiceState::Stopped);
}

#[test]
fn stop_takes_down_forked_descendants() {
    let dir = tempdir().unwrap();
    let manager = manager(&dir.path().join("state"));
    let def = service(
        "term-forking",
        dir.path(),
        "sleep 30 & echo $! > child.pid; sleep 30",
        None,
    );
    let op = OperationConfig::default();
    let controller = manager.controller(&def);

    assert_eq!(controller.start(&op).unwrap(), LaunchOutcome::Ready);
    let child_file = dir.path().join("child.pid");
    assert!(wait_until(Duration::from_secs(5), || {
        fs::read_to_string(&child_file).is_ok_and(|s| s.trim().parse::<u32>().is_ok())
    }));
    let child_pid: u32 = fs::read_to_string(&child_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    assert!(controller.stop(&op).is_ok());
    assert!(wait_until(Duration::from_secs(5), || !is_alive(child_pid)));
}
