//! Error handling for tender.
use std::time::Duration;

use thiserror::Error;

/// Defines all possible errors surfaced by service lifecycle operations.
#[derive(Debug, Error)]
pub enum TenderError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error parsing the configuration document.
    #[error("Invalid config format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// A service declared both launch check policies.
    #[error("Service '{service}' cannot specify both a log and port launch check")]
    InvalidLaunchCheck {
        /// The offending service.
        service: String,
    },

    /// Two services or groups share a name.
    #[error("Duplicate service or group name '{name}'")]
    DuplicateName {
        /// The repeated name.
        name: String,
    },

    /// A group references a child that is neither a service nor a group.
    #[error("Group '{group}' references unknown child '{child}'")]
    UnknownChild {
        /// The group declaring the child.
        group: String,
        /// The missing child name.
        child: String,
    },

    /// Groups reference each other in a loop.
    #[error("Detected group cycle: {cycle}")]
    GroupCycle {
        /// Human-readable cycle description (e.g. `a -> b -> a`).
        cycle: String,
    },

    /// The config references an environment variable that is not set.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Variable name.
        name: String,
    },

    /// A requested service or group name does not exist in the config.
    #[error("No service or group named '{name}'")]
    UnknownTarget {
        /// The requested name.
        name: String,
    },

    /// A build or stop command could not be spawned.
    #[error("Failed to run {action} command for service '{service}': {source}")]
    CommandError {
        /// The service whose command failed.
        service: String,
        /// Which command was being run.
        action: &'static str,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A build command exited unsuccessfully.
    #[error("Build failed for service '{service}' (exit status {code:?}){output}")]
    BuildFailed {
        /// The service that failed to build.
        service: String,
        /// Exit code, if the command was not killed by a signal.
        code: Option<i32>,
        /// Tail of the command's output, prefixed with a newline when present.
        output: String,
    },

    /// A stop command exited unsuccessfully.
    #[error("Stop command failed for service '{service}' (exit status {code:?})")]
    StopCommandFailed {
        /// The service being stopped.
        service: String,
        /// Exit code, if the command was not killed by a signal.
        code: Option<i32>,
    },

    /// Error spawning a service process.
    #[error("Failed to start service '{service}': {source}")]
    ServiceStartError {
        /// The service name that failed to start.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The launch check was never satisfied. The process is left running.
    #[error("Service '{service}' did not start within {timeout:?}")]
    DidNotStart {
        /// The service that never became ready.
        service: String,
        /// How long verification waited.
        timeout: Duration,
    },

    /// The launched process exited before becoming ready.
    #[error("Service '{service}' exited before it became ready")]
    ServiceExited {
        /// The service whose process died.
        service: String,
    },

    /// Error stopping a service process.
    #[error("Failed to stop service '{service}': {source}")]
    ServiceStopError {
        /// The service name that failed to stop.
        service: String,
        /// The step of the termination protocol that failed.
        #[source]
        source: TerminationError,
    },

    /// Error reading or writing a PID record.
    #[error("PID file error: {0}")]
    PidFileError(#[from] PidFileError),

    /// Error writing the structured log.
    #[error("Log file error for service '{service}': {source}")]
    LogError {
        /// The service whose log failed.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Services need root privileges but tender is not running as root.
    #[error("Service(s) {services:?} require sudo; re-run as root")]
    SudoRequired {
        /// The services that require sudo.
        services: Vec<String>,
    },

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

impl<T> From<std::sync::PoisonError<T>> for TenderError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        TenderError::MutexPoisonError(err.to_string())
    }
}

/// Error type for PID record operations.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// Error reading a PID record.
    #[error("Failed to read PID file for '{service}': {source}")]
    ReadError {
        /// Service owning the record.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error writing or removing a PID record.
    #[error("Failed to write PID file for '{service}': {source}")]
    WriteError {
        /// Service owning the record.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },
}

/// Steps of the termination protocol, used to give OS errors context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TerminationStep {
    /// Sending the graceful interrupt.
    Interrupt,
    /// Polling for liveness.
    LivenessCheck,
    /// Sending the forceful kill to the process group.
    ForceKill,
}

/// Failures raised by the termination protocol. Each aborts the remaining steps.
#[derive(Debug, Error)]
pub enum TerminationError {
    /// A signal or liveness syscall failed.
    #[error("{step} failed for PID {pid}: {source}")]
    Signal {
        /// Which step failed.
        step: TerminationStep,
        /// The target PID (or process group).
        pid: i32,
        /// The OS error.
        #[source]
        source: nix::errno::Errno,
    },

    /// The process group of the target could not be resolved.
    #[error("Failed to resolve process group of PID {pid}: {source}")]
    ProcessGroupLookup {
        /// The target PID.
        pid: i32,
        /// The OS error.
        #[source]
        source: nix::errno::Errno,
    },

    /// The resolved process group would signal unrelated processes.
    #[error("Refusing to kill suspect process group {pgid}")]
    SuspectProcessGroup {
        /// The degenerate group id.
        pgid: i32,
    },

    /// The process survived the forced kill.
    #[error("Process {pid} was not killed")]
    NotKilled {
        /// The target PID.
        pid: i32,
    },
}
