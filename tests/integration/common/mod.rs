#![allow(dead_code)]

use std::{
    net::TcpListener,
    path::Path,
    process::Command,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tender::{
    config::{LaunchCheck, ServiceCommands, ServiceDefinition},
    constants::Timings,
    process_tree::pid_alive,
    runtime::Paths,
    service::ServiceManager,
};

/// Timings short enough for tests but long enough for a loaded CI box.
pub fn test_timings() -> Timings {
    Timings {
        stop_poll_interval: Duration::from_millis(50),
        stop_grace_period: Duration::from_secs(3),
        kill_confirm_timeout: Duration::from_secs(2),
        launch_timeout: Duration::from_secs(10),
        log_check_interval: Duration::from_millis(50),
        port_check_interval: Duration::from_millis(100),
    }
}

/// Manager over a scratch state dir that launches through the built binary.
pub fn manager(state_dir: &Path) -> ServiceManager {
    ServiceManager::new(Paths::under(state_dir))
        .with_runner(env!("CARGO_BIN_EXE_tender"))
        .with_timings(test_timings())
}

pub fn service(
    name: &str,
    dir: &Path,
    launch: &str,
    launch_check: Option<LaunchCheck>,
) -> Arc<ServiceDefinition> {
    Arc::new(ServiceDefinition {
        name: name.to_string(),
        project_dir: dir.to_path_buf(),
        commands: ServiceCommands {
            launch: Some(launch.to_string()),
            ..ServiceCommands::default()
        },
        launch_check,
        ..ServiceDefinition::default()
    })
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

pub fn is_alive(pid: u32) -> bool {
    pid_alive(pid as i32).unwrap_or(false)
}

/// A port nothing is listening on right now.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

pub fn has_program(program: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {program}"))
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Live processes whose command line mentions `token`.
pub fn live_pids_mentioning(token: &str) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );
    system
        .processes()
        .iter()
        .filter(|(_, process)| process.thread_kind().is_none())
        .filter(|(_, process)| !matches!(process.status(), ProcessStatus::Zombie))
        .filter(|(_, process)| {
            process
                .cmd()
                .iter()
                .any(|arg| arg.to_string_lossy().contains(token))
        })
        .map(|(pid, _)| pid.as_u32())
        .collect()
}
