use assert_cmd::Command;
use predicates::boolean::PredicateBooleanExt;
use predicates::str::contains;
use std::{fs, path::Path};
use tempfile::tempdir;

fn tender(state: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tender").unwrap();
    cmd.env("TENDER_HOME", state).env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("tender.yaml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn status_json_lists_stopped_services() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
services:
  - name: cli-api
    commands:
      launch: exec sleep 30
  - name: cli-web
    commands:
      launch: exec sleep 30
"#,
    );

    let output = tender(&dir.path().join("state"))
        .args(["status", "--json", "-c"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());

    let statuses: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<_> = statuses
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["cli-api", "cli-web"]);
    assert!(statuses.as_array().unwrap().iter().all(|s| s["state"] == "stopped"));
}

#[test]
fn start_status_stop_through_the_binary() {
    let dir = tempdir().unwrap();
    let state = dir.path().join("state");
    let config = write_config(
        dir.path(),
        r#"
services:
  - name: cli-sleeper
    commands:
      build: echo compiled > build.out
      launch: echo ready; exec sleep 30
    launch_checks:
      log_text: ready
groups:
  - name: everything
    children: [cli-sleeper]
"#,
    );

    tender(&state)
        .args(["start", "everything", "-c"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("cli-sleeper: started"));
    assert!(dir.path().join("build.out").exists());
    assert!(state.join("pids/cli-sleeper.pid").exists());

    tender(&state)
        .args(["status", "--no-color", "-c"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("cli-sleeper").and(contains("running")));

    tender(&state)
        .args(["stop", "-c"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("cli-sleeper: stopped"));
    assert!(!state.join("pids/cli-sleeper.pid").exists());

    tender(&state)
        .args(["stop", "-c"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("cli-sleeper: not running"));
}

#[test]
fn failed_build_exits_non_zero() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
services:
  - name: cli-broken
    commands:
      build: exit 7
      launch: exec sleep 30
  - name: cli-idle
"#,
    );

    tender(&dir.path().join("state"))
        .args(["build", "-c"])
        .arg(&config)
        .assert()
        .failure()
        .stdout(contains("cli-broken: failed").and(contains("cli-idle: skipped")));
}

#[test]
fn conflicting_launch_checks_are_rejected() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
services:
  - name: cli-conflict
    commands:
      launch: exec sleep 30
    launch_checks:
      log_text: ready
      ports: [8080]
"#,
    );

    tender(&dir.path().join("state"))
        .args(["status", "-c"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("cli-conflict"));
}

#[test]
fn unknown_target_is_an_error() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "services:\n  - name: cli-only\n",
    );

    tender(&dir.path().join("state"))
        .args(["stop", "ghost", "-c"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("ghost"))
        .stdout(contains("cli-only").not());
}
