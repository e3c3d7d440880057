//! Per-service lifecycle: build, launch, verify, stop and status.
//!
//! [`ServiceManager`] carries what every operation shares (state paths,
//! timings, the runner executable and the OS seams). [`ServiceController`]
//! binds it to one [`ServiceDefinition`].
use std::{
    collections::BTreeSet,
    env,
    os::unix::process::CommandExt,
    panic,
    path::PathBuf,
    process::{Command, Output, Stdio},
    sync::Arc,
    thread,
};

use strum_macros::Display;
use tracing::{debug, error, info, warn};

use crate::config::ServiceDefinition;
use crate::constants::{
    BUILD_OUTPUT_TAIL_LINES, DEFAULT_SHELL, RUNNER_SUBCOMMAND, SHELL_COMMAND_FLAG, Timings,
};
use crate::error::TenderError;
use crate::group::ServiceOrGroup;
use crate::identity::PidRecord;
use crate::launch_check::{LaunchVerifier, Readiness, ReadinessProbe, SystemProbe};
use crate::logs::{log_counts, prepare_log};
use crate::process_tree::{ProcessTable, discover_ports};
use crate::runtime::Paths;
use crate::status::{ServiceState, ServiceStatus, StatusSweep};
use crate::termination::{ProcessSignaller, StopOutcome, SystemSignaller, TerminationController};

/// Per-invocation options shared by every service in an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationConfig {
    /// Services left out of the operation.
    pub exclusions: Vec<String>,
    /// Skip build commands on start and restart.
    pub skip_build: bool,
}

impl OperationConfig {
    /// Whether `definition` takes no part in this operation. Services pinned to
    /// another platform are always excluded.
    pub fn is_excluded(&self, definition: &ServiceDefinition) -> bool {
        !definition.matches_platform()
            || self.exclusions.iter().any(|name| *name == definition.name)
    }
}

/// The result of one operation on one service.
#[derive(Debug)]
pub struct ServiceOutcome<T> {
    /// Service name.
    pub service: String,
    /// What happened.
    pub result: Result<T, TenderError>,
}

impl<T> ServiceOutcome<T> {
    /// Pairs `result` with the service it belongs to.
    pub fn new(service: impl Into<String>, result: Result<T, TenderError>) -> Self {
        Self {
            service: service.into(),
            result,
        }
    }

    /// Whether the operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// How a build request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BuildOutcome {
    /// The build command succeeded.
    #[strum(to_string = "built")]
    Built,
    /// Excluded, or no build command configured.
    #[strum(to_string = "skipped")]
    Skipped,
}

/// How a launch request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LaunchOutcome {
    /// Spawned and verified.
    #[strum(to_string = "started")]
    Ready,
    /// A validated process was already running; nothing was spawned.
    #[strum(to_string = "already running")]
    AlreadyRunning,
    /// Excluded, or no launch command configured.
    #[strum(to_string = "skipped")]
    Skipped,
}

/// Shared context for lifecycle operations.
pub struct ServiceManager {
    paths: Paths,
    timings: Timings,
    runner: PathBuf,
    signaller: Arc<dyn ProcessSignaller>,
    probe: Arc<dyn ReadinessProbe + Send + Sync>,
}

impl ServiceManager {
    /// Manager storing state under `paths`, re-executing the current binary as
    /// the launch runner.
    pub fn new(paths: Paths) -> Self {
        let runner = env::current_exe().unwrap_or_else(|err| {
            warn!("Unable to resolve the current executable ({err}); falling back to PATH lookup");
            PathBuf::from(env!("CARGO_PKG_NAME"))
        });
        Self {
            paths,
            timings: Timings::default(),
            runner,
            signaller: Arc::new(SystemSignaller),
            probe: Arc::new(SystemProbe),
        }
    }

    /// Overrides the polling intervals and ceilings.
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Overrides the executable used as the launch runner.
    pub fn with_runner(mut self, runner: impl Into<PathBuf>) -> Self {
        self.runner = runner.into();
        self
    }

    /// Overrides how processes are signalled.
    pub fn with_signaller(mut self, signaller: Arc<dyn ProcessSignaller>) -> Self {
        self.signaller = signaller;
        self
    }

    /// Overrides how launch readiness is observed.
    pub fn with_probe(mut self, probe: Arc<dyn ReadinessProbe + Send + Sync>) -> Self {
        self.probe = probe;
        self
    }

    /// State paths in use.
    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Timings in use.
    pub fn timings(&self) -> Timings {
        self.timings
    }

    /// Controller for one service.
    pub fn controller<'a>(&'a self, definition: &'a ServiceDefinition) -> ServiceController<'a> {
        ServiceController {
            manager: self,
            record: PidRecord::new(&self.paths, &definition.name),
            definition,
        }
    }

    /// Runs build commands across `targets`.
    pub fn build(
        &self,
        targets: &[ServiceOrGroup],
        op: &OperationConfig,
    ) -> Vec<ServiceOutcome<BuildOutcome>> {
        Self::fan_out(targets, |target| target.build(self, op))
    }

    /// Builds and launches `targets`.
    pub fn start(
        &self,
        targets: &[ServiceOrGroup],
        op: &OperationConfig,
    ) -> Vec<ServiceOutcome<LaunchOutcome>> {
        Self::fan_out(targets, |target| target.start(self, op))
    }

    /// Stops `targets`.
    pub fn stop(
        &self,
        targets: &[ServiceOrGroup],
        op: &OperationConfig,
    ) -> Vec<ServiceOutcome<StopOutcome>> {
        Self::fan_out(targets, |target| target.stop(self, op))
    }

    /// Stops then starts `targets`.
    pub fn restart(
        &self,
        targets: &[ServiceOrGroup],
        op: &OperationConfig,
    ) -> Vec<ServiceOutcome<LaunchOutcome>> {
        Self::fan_out(targets, |target| target.restart(self, op))
    }

    /// Reports every service in `targets` against one shared sweep.
    pub fn status(&self, targets: &[ServiceOrGroup]) -> Vec<ServiceOutcome<ServiceStatus>> {
        let sweep = StatusSweep::capture();
        Self::fan_out(targets, |target| target.status(self, &sweep))
    }

    /// Runs `op` on each top-level target concurrently. Outcomes keep the
    /// order of `targets`. Targets that share a service run one after another
    /// so no service sees two operations at once.
    fn fan_out<T, F>(targets: &[ServiceOrGroup], op: F) -> Vec<ServiceOutcome<T>>
    where
        T: Send,
        F: Fn(&ServiceOrGroup) -> Vec<ServiceOutcome<T>> + Sync,
    {
        if targets.len() <= 1 {
            return targets.iter().flat_map(&op).collect();
        }
        if let Some(service) = shared_service(targets) {
            warn!("Service '{service}' is named by more than one target; running targets sequentially");
            return targets.iter().flat_map(&op).collect();
        }

        thread::scope(|scope| {
            let handles: Vec<_> = targets
                .iter()
                .map(|target| {
                    let op = &op;
                    scope.spawn(move || op(target))
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap_or_else(|err| panic::resume_unwind(err)))
                .collect()
        })
    }
}

/// Lifecycle operations for one service.
pub struct ServiceController<'a> {
    manager: &'a ServiceManager,
    definition: &'a ServiceDefinition,
    record: PidRecord,
}

impl ServiceController<'_> {
    fn name(&self) -> &str {
        &self.definition.name
    }

    /// Runs the build command to completion in the service's working directory.
    pub fn build(&self, op: &OperationConfig) -> Result<BuildOutcome, TenderError> {
        if op.is_excluded(self.definition) {
            debug!("Skipping build for excluded service '{}'", self.name());
            return Ok(BuildOutcome::Skipped);
        }
        let Some(command) = self.definition.commands.build.as_deref() else {
            return Ok(BuildOutcome::Skipped);
        };

        info!("Building service '{}'", self.name());
        let output = self.run_command("build", command)?;
        if output.status.success() {
            Ok(BuildOutcome::Built)
        } else {
            error!(
                "Build for '{}' exited with {:?}",
                self.name(),
                output.status.code()
            );
            Err(TenderError::BuildFailed {
                service: self.name().to_string(),
                code: output.status.code(),
                output: output_tail(&output),
            })
        }
    }

    /// Spawns the launch command under the runner and waits for readiness.
    pub fn launch(&self, op: &OperationConfig) -> Result<LaunchOutcome, TenderError> {
        if op.is_excluded(self.definition) {
            debug!("Skipping launch for excluded service '{}'", self.name());
            return Ok(LaunchOutcome::Skipped);
        }
        let Some(command) = self.definition.commands.launch.as_deref() else {
            warn!("Service '{}' has no launch command; skipping", self.name());
            return Ok(LaunchOutcome::Skipped);
        };

        if let Some(identity) = self.record.resolve(&ProcessTable::capture())? {
            info!(
                "Service '{}' is already running with PID {}",
                self.name(),
                identity.pid
            );
            return Ok(LaunchOutcome::AlreadyRunning);
        }

        let log_path = self.manager.paths.log_file(self.name());
        prepare_log(&log_path).map_err(|source| TenderError::LogError {
            service: self.name().to_string(),
            source,
        })?;

        let mut cmd = Command::new(&self.manager.runner);
        cmd.arg(RUNNER_SUBCOMMAND)
            .arg("--service")
            .arg(self.name())
            .arg("--log")
            .arg(&log_path)
            .arg("--")
            .arg(command)
            .current_dir(self.definition.working_dir())
            .envs(self.definition.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // A fresh session makes the runner a process group leader, so the whole
        // tree can be signalled as a unit and outlives this invocation.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        debug!("Launching service '{}' with command: `{command}`", self.name());
        let mut child = cmd.spawn().map_err(|source| {
            error!("Failed to start service '{}': {source}", self.name());
            TenderError::ServiceStartError {
                service: self.name().to_string(),
                source,
            }
        })?;
        let pid = child.id();
        if let Err(err) = self.record.save(pid) {
            // Without a record nothing could find this process again.
            error!(
                "Failed to record PID {pid} for '{}'; killing its process group",
                self.name()
            );
            if let Err(errno) = self.manager.signaller.kill_group(pid as i32) {
                warn!("Failed to kill process group {pid} for '{}': {errno}", self.name());
            }
            if let Err(wait_err) = child.wait() {
                debug!("Failed to reap runner for '{}': {wait_err}", self.name());
            }
            return Err(err.into());
        }

        let service = self.name().to_string();
        thread::spawn(move || match child.wait() {
            Ok(status) => debug!("Runner for '{service}' exited with {status}"),
            Err(err) => debug!("Failed to reap runner for '{service}': {err}"),
        });

        let verifier = LaunchVerifier::new(self.manager.probe.as_ref(), self.manager.timings);
        match verifier.verify(pid, self.definition.launch_check.as_ref(), &log_path) {
            Readiness::Ready => {
                info!("Service '{}' started with PID {pid}", self.name());
                Ok(LaunchOutcome::Ready)
            }
            Readiness::Exited => {
                self.record.clear()?;
                Err(TenderError::ServiceExited {
                    service: self.name().to_string(),
                })
            }
            Readiness::TimedOut => Err(TenderError::DidNotStart {
                service: self.name().to_string(),
                timeout: self.manager.timings.launch_timeout,
            }),
        }
    }

    /// Build followed by launch. A failed build launches nothing.
    pub fn start(&self, op: &OperationConfig) -> Result<LaunchOutcome, TenderError> {
        if !op.skip_build {
            self.build(op)?;
        }
        self.launch(op)
    }

    /// Runs the stop command (if any) then the termination protocol against
    /// the validated identity. A service that is not running gets neither.
    pub fn stop(&self, op: &OperationConfig) -> Result<StopOutcome, TenderError> {
        if op.is_excluded(self.definition) {
            debug!("Skipping stop for excluded service '{}'", self.name());
            return Ok(StopOutcome::Skipped);
        }

        let pid = self
            .record
            .resolve(&ProcessTable::capture())?
            .map(|identity| identity.pid);

        let stop_command_result = match (pid, self.definition.commands.stop.as_deref()) {
            (Some(_), Some(command)) => self.run_stop_command(command),
            _ => Ok(()),
        };

        let controller =
            TerminationController::new(self.manager.signaller.as_ref(), self.manager.timings);
        match controller.stop(pid) {
            Ok(outcome) => {
                self.record.clear()?;
                match outcome {
                    StopOutcome::NotRunning => info!("Service '{}' is not running", self.name()),
                    StopOutcome::Killed => warn!("Service '{}' was killed", self.name()),
                    _ => info!("Service '{}' stopped", self.name()),
                }
                stop_command_result.map(|()| outcome)
            }
            Err(source) => {
                let gone = pid.is_some_and(|pid| {
                    !self.manager.signaller.is_alive(pid as i32).unwrap_or(true)
                });
                if gone {
                    self.record.clear()?;
                }
                Err(TenderError::ServiceStopError {
                    service: self.name().to_string(),
                    source,
                })
            }
        }
    }

    /// Stop followed by start.
    pub fn restart(&self, op: &OperationConfig) -> Result<LaunchOutcome, TenderError> {
        self.stop(op)?;
        self.start(op)
    }

    /// Current status, validated against the sweep's process table.
    pub fn status(&self, sweep: &StatusSweep) -> Result<ServiceStatus, TenderError> {
        let counts = log_counts(&self.manager.paths.log_file(self.name()));
        let Some(identity) = self.record.resolve(sweep.processes())? else {
            return Ok(ServiceStatus::stopped(self.name(), counts));
        };

        let declared = self.definition.declared_ports();
        let declared_set: BTreeSet<u16> = declared.iter().copied().collect();
        let discovered = discover_ports(
            sweep.processes(),
            sweep.connections(),
            identity.pid,
            &declared_set,
        );

        let mut ports: Vec<u16> = Vec::with_capacity(declared.len() + discovered.len());
        for port in declared.iter().copied().chain(discovered) {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }

        Ok(ServiceStatus {
            name: self.name().to_string(),
            state: ServiceState::Running,
            pid: Some(identity.pid),
            started_at: identity.started_at,
            ports: ports.iter().map(u16::to_string).collect(),
            stdout_lines: counts.0,
            stderr_lines: counts.1,
        })
    }

    fn run_stop_command(&self, command: &str) -> Result<(), TenderError> {
        info!("Running stop command for '{}'", self.name());
        let output = self.run_command("stop", command)?;
        if output.status.success() {
            Ok(())
        } else {
            warn!(
                "Stop command for '{}' exited with {:?}",
                self.name(),
                output.status.code()
            );
            Err(TenderError::StopCommandFailed {
                service: self.name().to_string(),
                code: output.status.code(),
            })
        }
    }

    fn run_command(&self, action: &'static str, command: &str) -> Result<Output, TenderError> {
        debug!("Running {action} command for '{}': `{command}`", self.name());
        Command::new(DEFAULT_SHELL)
            .arg(SHELL_COMMAND_FLAG)
            .arg(command)
            .current_dir(self.definition.working_dir())
            .envs(self.definition.environment())
            .stdin(Stdio::null())
            .output()
            .map_err(|source| TenderError::CommandError {
                service: self.name().to_string(),
                action,
                source,
            })
    }
}

/// First service reachable from more than one of `targets`.
fn shared_service(targets: &[ServiceOrGroup]) -> Option<String> {
    let mut seen = BTreeSet::new();
    for target in targets {
        let names: BTreeSet<String> = target
            .services()
            .iter()
            .map(|service| service.name.clone())
            .collect();
        for name in names {
            if !seen.insert(name.clone()) {
                return Some(name);
            }
        }
    }
    None
}

/// Last few lines of a command's combined output, newline-prefixed for use in
/// an error message.
fn output_tail(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stdout
        .lines()
        .chain(stderr.lines())
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = lines.len().saturating_sub(BUILD_OUTPUT_TAIL_LINES);
    lines[start..]
        .iter()
        .map(|line| format!("\n  {line}"))
        .collect()
}
