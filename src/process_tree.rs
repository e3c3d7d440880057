//! Read-only introspection over the OS process and socket tables.
//!
//! [`ProcessTable`] is a fresh snapshot of every process, taken per operation.
//! [`ConnectionSnapshot`] holds the listening sockets; it is the expensive part
//! of a status sweep, so a sweep captures it once and shares it across services.
use std::collections::{BTreeSet, HashMap, HashSet};

use nix::{errno::Errno, sys::signal, unistd::Pid as NixPid};
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, warn};

/// One process as seen at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Process id.
    pub pid: u32,
    /// Parent process id.
    pub parent: Option<u32>,
    /// Full command line, arguments joined by spaces.
    pub cmdline: String,
    /// Creation time in seconds since the epoch.
    pub start_time: u64,
    /// Whether the process has exited but not been reaped.
    pub zombie: bool,
}

/// Snapshot of the OS process table.
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    entries: HashMap<u32, ProcessEntry>,
}

impl ProcessTable {
    /// Queries the OS for every process, including command lines.
    pub fn capture() -> Self {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        let entries = system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| {
                let cmdline = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                let entry = ProcessEntry {
                    pid: pid.as_u32(),
                    parent: process.parent().map(|parent| parent.as_u32()),
                    cmdline,
                    start_time: process.start_time(),
                    zombie: matches!(process.status(), ProcessStatus::Zombie),
                };
                (entry.pid, entry)
            })
            .collect();

        Self { entries }
    }

    /// Builds a table from explicit entries.
    pub fn from_entries(entries: impl IntoIterator<Item = ProcessEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|entry| (entry.pid, entry)).collect(),
        }
    }

    /// The entry for `pid`, if present.
    pub fn get(&self, pid: u32) -> Option<&ProcessEntry> {
        self.entries.get(&pid)
    }

    /// Whether `pid` exists and is not a zombie.
    pub fn is_alive(&self, pid: u32) -> bool {
        self.get(pid).is_some_and(|entry| !entry.zombie)
    }

    /// Command line of `pid`.
    pub fn cmdline(&self, pid: u32) -> Option<&str> {
        self.get(pid).map(|entry| entry.cmdline.as_str())
    }

    /// Creation time of `pid`, seconds since the epoch.
    pub fn start_time(&self, pid: u32) -> Option<u64> {
        self.get(pid).map(|entry| entry.start_time)
    }

    /// Direct children of `pid`, sorted.
    pub fn children(&self, pid: u32) -> Vec<u32> {
        let mut children: Vec<u32> = self
            .entries
            .values()
            .filter(|entry| entry.parent == Some(pid) && entry.pid != pid)
            .map(|entry| entry.pid)
            .collect();
        children.sort_unstable();
        children
    }
}

/// A socket in LISTEN state and the process owning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListeningSocket {
    /// Owning process.
    pub pid: u32,
    /// Local port.
    pub port: u16,
}

/// The system-wide set of listening sockets, valid for one sweep.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSnapshot {
    listening: Vec<ListeningSocket>,
}

impl ConnectionSnapshot {
    /// Reads the listening sockets from the OS. Failure yields an empty snapshot;
    /// ports are reporting data and a missing table only hides them.
    pub fn capture() -> Self {
        match listeners::get_all() {
            Ok(all) => {
                let listening = all
                    .into_iter()
                    .map(|listener| ListeningSocket {
                        pid: listener.process.pid,
                        port: listener.socket.port(),
                    })
                    .collect::<Vec<_>>();
                debug!("Captured {} listening sockets", listening.len());
                Self { listening }
            }
            Err(err) => {
                warn!("Failed to read the socket table: {err}");
                Self::default()
            }
        }
    }

    /// Builds a snapshot from explicit sockets.
    pub fn from_sockets(sockets: impl IntoIterator<Item = ListeningSocket>) -> Self {
        Self {
            listening: sockets.into_iter().collect(),
        }
    }

    /// Ports held in LISTEN state by `pid` itself.
    pub fn ports_for(&self, pid: u32) -> impl Iterator<Item = u16> + '_ {
        self.listening
            .iter()
            .filter(move |socket| socket.pid == pid)
            .map(|socket| socket.port)
    }
}

/// Collects listening ports held by `root` or any descendant, leaving out
/// `declared` ports so they are not reported twice.
///
/// Depth-first over the snapshot; a child that vanished before the snapshot
/// simply contributes nothing.
pub fn discover_ports(
    table: &ProcessTable,
    connections: &ConnectionSnapshot,
    root: u32,
    declared: &BTreeSet<u16>,
) -> BTreeSet<u16> {
    let mut ports = BTreeSet::new();
    let mut visited = HashSet::new();
    let mut stack = vec![root];

    while let Some(pid) = stack.pop() {
        if !visited.insert(pid) {
            continue;
        }
        ports.extend(
            connections
                .ports_for(pid)
                .filter(|port| !declared.contains(port)),
        );
        stack.extend(table.children(pid));
    }

    ports
}

/// Asks the OS whether `pid` is alive. Zombies count as gone; a process we may
/// not signal (EPERM) counts as alive.
pub fn pid_alive(pid: i32) -> Result<bool, Errno> {
    match signal::kill(NixPid::from_raw(pid), None) {
        Ok(()) => Ok(!is_zombie(pid)),
        Err(Errno::ESRCH) => Ok(false),
        Err(Errno::EPERM) => Ok(true),
        Err(err) => Err(err),
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: i32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The command name is wrapped in parentheses and may contain spaces; the
    // state character follows the closing one.
    stat.rfind(')')
        .and_then(|idx| stat[idx + 1..].trim_start().chars().next())
        .is_some_and(|state| matches!(state, 'Z' | 'X'))
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(pid: i32) -> bool {
    let mut system = System::new();
    let target = sysinfo::Pid::from_u32(pid as u32);
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system
        .process(target)
        .is_some_and(|process| matches!(process.status(), ProcessStatus::Zombie))
}
