mod common;

use std::{
    process::{Command, Stdio},
    time::Duration,
};

use tempfile::tempdir;
use tender::{
    config::LaunchCheck,
    group::ServiceOrGroup,
    identity::PidRecord,
    service::{LaunchOutcome, OperationConfig},
    status::ServiceState,
    termination::StopOutcome,
};

use common::{free_port, has_program, is_alive, manager, service, wait_until};

#[test]
fn stale_pid_reads_as_stopped_and_is_cleared_once() {
    let dir = tempdir().unwrap();
    let manager = manager(&dir.path().join("state"));
    let def = service("status-stale", dir.path(), "exec sleep 30", None);

    let mut exited = Command::new("true").spawn().unwrap();
    let dead_pid = exited.id();
    exited.wait().unwrap();

    let record = PidRecord::new(manager.paths(), "status-stale");
    record.save(dead_pid).unwrap();

    let targets = [ServiceOrGroup::Service(def)];
    let first = manager.status(&targets);
    assert_eq!(first[0].result.as_ref().unwrap().state, ServiceState::Stopped);
    assert!(!record.exists());

    let second = manager.status(&targets);
    assert_eq!(second[0].result.as_ref().unwrap().state, ServiceState::Stopped);
    assert!(!record.exists());
}

#[test]
fn reused_pid_is_never_signalled() {
    let dir = tempdir().unwrap();
    let manager = manager(&dir.path().join("state"));
    let def = service("status-reused", dir.path(), "exec sleep 30", None);

    let mut bystander = Command::new("sleep")
        .arg("30")
        .stdout(Stdio::null())
        .spawn()
        .unwrap();
    let record = PidRecord::new(manager.paths(), "status-reused");
    record.save(bystander.id()).unwrap();

    let targets = [ServiceOrGroup::Service(def.clone())];
    let statuses = manager.status(&targets);
    assert_eq!(statuses[0].result.as_ref().unwrap().state, ServiceState::Stopped);
    assert!(!record.exists());

    record.save(bystander.id()).unwrap();
    assert_eq!(
        manager.controller(&def).stop(&OperationConfig::default()).unwrap(),
        StopOutcome::NotRunning
    );
    assert!(is_alive(bystander.id()));

    bystander.kill().unwrap();
    bystander.wait().unwrap();
}

#[test]
fn port_check_waits_for_bind_and_status_reports_it() {
    if !has_program("python3") {
        eprintln!("python3 not available; skipping");
        return;
    }

    let dir = tempdir().unwrap();
    let manager = manager(&dir.path().join("state"));
    let port = free_port();
    let def = service(
        "status-http",
        dir.path(),
        &format!("sleep 1; exec python3 -m http.server {port} --bind 127.0.0.1"),
        Some(LaunchCheck::Ports(vec![port])),
    );
    let op = OperationConfig::default();
    let controller = manager.controller(&def);

    assert_eq!(controller.start(&op).unwrap(), LaunchOutcome::Ready);
    let pid = PidRecord::new(manager.paths(), "status-http")
        .load()
        .unwrap()
        .unwrap();

    let targets = [ServiceOrGroup::Service(def.clone())];
    let statuses = manager.status(&targets);
    let status = statuses[0].result.as_ref().unwrap();
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.pid, Some(pid));
    assert_eq!(status.ports, vec![port.to_string()]);

    assert!(controller.stop(&op).is_ok());
    assert!(wait_until(Duration::from_secs(5), || !is_alive(pid)));
    let statuses = manager.status(&targets);
    assert_eq!(statuses[0].result.as_ref().unwrap().state, ServiceState::Stopped);
}
