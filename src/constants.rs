//! Constants and tunable timings used across the lifecycle subsystem.
//!
//! Every blocking step polls on a fixed interval against a ceiling, so each
//! operation has a worst-case latency equal to its timeout.

use std::time::Duration;

// ============================================================================
// File System Constants
// ============================================================================

/// Environment variable overriding the tool's state directory.
pub const HOME_ENV_VAR: &str = "TENDER_HOME";

/// State directory relative to `$HOME` when no override is set.
pub const USER_STATE_SUBDIR: &str = ".local/share/tender";

/// Directory (under the state dir) holding one PID record per service.
pub const PID_DIR_NAME: &str = "pids";

/// Directory (under the state dir) holding one structured log per service.
pub const LOG_DIR_NAME: &str = "logs";

/// Extension of PID record files.
pub const PID_FILE_EXTENSION: &str = "pid";

/// Extension of structured log files.
pub const LOG_FILE_EXTENSION: &str = "log";

/// Config files probed in the current directory when none is given.
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["tender.yaml", "tender.json"];

// ============================================================================
// Shell Execution Constants
// ============================================================================

/// Default shell used for executing service commands.
pub const DEFAULT_SHELL: &str = "sh";

/// Shell argument flag for executing command strings.
pub const SHELL_COMMAND_FLAG: &str = "-c";

/// Hidden subcommand the launcher re-executes to own a service's output.
pub const RUNNER_SUBCOMMAND: &str = "run";

/// Number of trailing output lines attached to a build failure.
pub const BUILD_OUTPUT_TAIL_LINES: usize = 20;

// ============================================================================
// Process Management Timing
// ============================================================================

/// Interval between liveness checks after an interrupt.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period before escalating to a forced kill.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long to wait for a force-killed group to disappear.
pub const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum time a launch check may take before the launch is declared failed.
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval for the log-text launch check.
pub const LOG_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Poll interval for the port launch check. Each poll walks the process and
/// socket tables, so it runs less often than the log check.
pub const PORT_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Bundle of every polling interval and ceiling used by one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Interval between liveness checks after an interrupt.
    pub stop_poll_interval: Duration,
    /// Grace period before escalating to a forced kill.
    pub stop_grace_period: Duration,
    /// How long to wait for a force-killed group to disappear.
    pub kill_confirm_timeout: Duration,
    /// Overall launch verification timeout.
    pub launch_timeout: Duration,
    /// Poll interval for the log-text launch check.
    pub log_check_interval: Duration,
    /// Poll interval for the port launch check.
    pub port_check_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            stop_poll_interval: STOP_POLL_INTERVAL,
            stop_grace_period: STOP_GRACE_PERIOD,
            kill_confirm_timeout: KILL_CONFIRM_TIMEOUT,
            launch_timeout: LAUNCH_TIMEOUT,
            log_check_interval: LOG_CHECK_INTERVAL,
            port_check_interval: PORT_CHECK_INTERVAL,
        }
    }
}
