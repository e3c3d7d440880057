//! Launch verification.
//!
//! After a launch command is spawned, [`LaunchVerifier`] polls until the
//! service's [`LaunchCheck`] holds, the process dies, or the timeout fires.
use std::{
    collections::BTreeSet,
    path::Path,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::config::LaunchCheck;
use crate::constants::Timings;
use crate::logs::LogFollower;
use crate::process_tree::{ConnectionSnapshot, ProcessTable, discover_ports, pid_alive};

/// What the verifier observes about a launched process.
pub trait ReadinessProbe {
    /// Whether `pid` is still running.
    fn is_alive(&self, pid: u32) -> bool;
    /// Every port `pid` or any of its descendants has in LISTEN state.
    fn listening_ports(&self, pid: u32) -> BTreeSet<u16>;
}

/// [`ReadinessProbe`] backed by fresh OS snapshots on every poll.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl ReadinessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        pid_alive(pid as i32).unwrap_or(false)
    }

    fn listening_ports(&self, pid: u32) -> BTreeSet<u16> {
        let table = ProcessTable::capture();
        let connections = ConnectionSnapshot::capture();
        discover_ports(&table, &connections, pid, &BTreeSet::new())
    }
}

/// Result of verifying one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The launch check is satisfied (or there is none).
    Ready,
    /// The process exited before becoming ready.
    Exited,
    /// The timeout fired first. The process is left running.
    TimedOut,
}

/// Polls a launched process until its launch check resolves.
pub struct LaunchVerifier<'a> {
    probe: &'a dyn ReadinessProbe,
    timings: Timings,
}

impl<'a> LaunchVerifier<'a> {
    /// Verifier reading process state through `probe`.
    pub fn new(probe: &'a dyn ReadinessProbe, timings: Timings) -> Self {
        Self { probe, timings }
    }

    /// Waits for `pid` to satisfy `check`. Without a check the launch is ready
    /// as soon as it was spawned.
    pub fn verify(&self, pid: u32, check: Option<&LaunchCheck>, log_path: &Path) -> Readiness {
        match check {
            None => Readiness::Ready,
            Some(LaunchCheck::LogText(needle)) => {
                let mut follower = LogFollower::new(log_path);
                self.poll(pid, self.timings.log_check_interval, || {
                    match follower.find_text(needle) {
                        Ok(found) => found,
                        Err(err) => {
                            warn!("Failed to read log {}: {err}", log_path.display());
                            false
                        }
                    }
                })
            }
            Some(LaunchCheck::Ports(expected)) => {
                let expected: BTreeSet<u16> = expected.iter().copied().collect();
                self.poll(pid, self.timings.port_check_interval, || {
                    let bound = self.probe.listening_ports(pid);
                    let missing: Vec<_> = expected.difference(&bound).collect();
                    if !missing.is_empty() {
                        debug!("PID {pid} still waiting on ports {missing:?}");
                    }
                    missing.is_empty()
                })
            }
        }
    }

    /// Readiness is checked before liveness so output written just before a
    /// quick exit still counts.
    fn poll(&self, pid: u32, interval: Duration, mut ready: impl FnMut() -> bool) -> Readiness {
        let deadline = Instant::now() + self.timings.launch_timeout;
        loop {
            if ready() {
                return Readiness::Ready;
            }
            if !self.probe.is_alive(pid) {
                return Readiness::Exited;
            }
            if Instant::now() >= deadline {
                return Readiness::TimedOut;
            }
            thread::sleep(interval);
        }
    }
}
