//! Escalating shutdown: interrupt, wait, then force-kill the process group.
use std::{
    thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::{Pid, getpgid},
};
use strum_macros::Display;
use tracing::{debug, info, warn};

use crate::constants::Timings;
use crate::error::{TerminationError, TerminationStep};
use crate::process_tree::pid_alive;

/// The OS operations the termination protocol needs.
pub trait ProcessSignaller: Send + Sync {
    /// Sends the graceful interrupt to `pid`.
    fn interrupt(&self, pid: i32) -> Result<(), Errno>;
    /// Whether `pid` is still alive.
    fn is_alive(&self, pid: i32) -> Result<bool, Errno>;
    /// Resolves the process group of `pid`.
    fn process_group(&self, pid: i32) -> Result<i32, Errno>;
    /// Force-kills every process in group `pgid`.
    fn kill_group(&self, pgid: i32) -> Result<(), Errno>;
}

/// [`ProcessSignaller`] backed by real signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignaller;

impl ProcessSignaller for SystemSignaller {
    fn interrupt(&self, pid: i32) -> Result<(), Errno> {
        signal::kill(Pid::from_raw(pid), Signal::SIGINT)
    }

    fn is_alive(&self, pid: i32) -> Result<bool, Errno> {
        pid_alive(pid)
    }

    fn process_group(&self, pid: i32) -> Result<i32, Errno> {
        getpgid(Some(Pid::from_raw(pid))).map(Pid::as_raw)
    }

    fn kill_group(&self, pgid: i32) -> Result<(), Errno> {
        signal::killpg(Pid::from_raw(pgid), Signal::SIGKILL)
    }
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StopOutcome {
    /// The service was excluded from the operation.
    #[strum(to_string = "skipped")]
    Skipped,
    /// There was no process to stop.
    #[strum(to_string = "not running")]
    NotRunning,
    /// The process exited after the interrupt.
    #[strum(to_string = "stopped")]
    Stopped,
    /// The process group had to be force-killed.
    #[strum(to_string = "killed")]
    Killed,
}

/// Progress of one stop request. A returned error is the failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TerminationState {
    /// Nothing sent yet.
    Running,
    /// The interrupt was delivered.
    InterruptSent,
    /// Polling for exit within the grace period.
    WaitingForExit,
    /// The process group was force-killed.
    ForceKillSent,
    /// The process exited cleanly.
    Stopped,
    /// The process exited after the forced kill.
    Killed,
}

/// Runs the stop protocol against one recorded PID.
pub struct TerminationController<'a> {
    signaller: &'a dyn ProcessSignaller,
    timings: Timings,
}

impl<'a> TerminationController<'a> {
    /// Controller using `signaller` for OS access.
    pub fn new(signaller: &'a dyn ProcessSignaller, timings: Timings) -> Self {
        Self { signaller, timings }
    }

    /// Stops `pid`. A missing or zero PID is a soft "not running" outcome and
    /// sends no signal.
    pub fn stop(&self, pid: Option<u32>) -> Result<StopOutcome, TerminationError> {
        let Some(pid) = pid.filter(|pid| *pid != 0) else {
            debug!("No recorded PID; nothing to stop");
            return Ok(StopOutcome::NotRunning);
        };
        let pid = pid as i32;

        let mut state = TerminationState::Running;
        loop {
            state = self.advance(pid, state)?;
            debug!("PID {pid} termination state: {state}");
            match state {
                TerminationState::Stopped => return Ok(StopOutcome::Stopped),
                TerminationState::Killed => return Ok(StopOutcome::Killed),
                _ => continue,
            }
        }
    }

    fn advance(
        &self,
        pid: i32,
        state: TerminationState,
    ) -> Result<TerminationState, TerminationError> {
        match state {
            TerminationState::Running => match self.signaller.interrupt(pid) {
                Ok(()) => Ok(TerminationState::InterruptSent),
                Err(Errno::ESRCH) => {
                    debug!("PID {pid} exited before the interrupt was delivered");
                    Ok(TerminationState::Stopped)
                }
                Err(source) => Err(TerminationError::Signal {
                    step: TerminationStep::Interrupt,
                    pid,
                    source,
                }),
            },
            TerminationState::InterruptSent => {
                if self.alive(pid)? {
                    Ok(TerminationState::WaitingForExit)
                } else {
                    Ok(TerminationState::Stopped)
                }
            }
            TerminationState::WaitingForExit => {
                if self.wait_for_exit(pid, self.timings.stop_grace_period)? {
                    return Ok(TerminationState::Stopped);
                }
                warn!(
                    "SIGINT failed to stop PID {pid} within {:?}; sending SIGKILL to its process group",
                    self.timings.stop_grace_period
                );
                self.kill_group(pid)?;
                Ok(TerminationState::ForceKillSent)
            }
            TerminationState::ForceKillSent => {
                if self.wait_for_exit(pid, self.timings.kill_confirm_timeout)? {
                    info!("PID {pid} killed");
                    Ok(TerminationState::Killed)
                } else {
                    Err(TerminationError::NotKilled { pid })
                }
            }
            done @ (TerminationState::Stopped | TerminationState::Killed) => Ok(done),
        }
    }

    fn alive(&self, pid: i32) -> Result<bool, TerminationError> {
        self.signaller
            .is_alive(pid)
            .map_err(|source| TerminationError::Signal {
                step: TerminationStep::LivenessCheck,
                pid,
                source,
            })
    }

    /// Polls until `pid` exits or `ceiling` elapses. Returns whether it exited.
    fn wait_for_exit(&self, pid: i32, ceiling: Duration) -> Result<bool, TerminationError> {
        let deadline = Instant::now() + ceiling;
        loop {
            if !self.alive(pid)? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(self.timings.stop_poll_interval);
        }
    }

    fn kill_group(&self, pid: i32) -> Result<(), TerminationError> {
        let pgid = self
            .signaller
            .process_group(pid)
            .map_err(|source| TerminationError::ProcessGroupLookup { pid, source })?;

        // 0 and 1 are the no-group and init groups.
        if pgid == 0 || pgid == 1 {
            return Err(TerminationError::SuspectProcessGroup { pgid });
        }

        match self.signaller.kill_group(pgid) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(TerminationError::Signal {
                step: TerminationStep::ForceKill,
                pid: pgid,
                source,
            }),
        }
    }
}
