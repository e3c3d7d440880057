//! Service status reporting.
use std::sync::OnceLock;

use chrono::{DateTime, Local};
use serde::Serialize;
use strum_macros::Display;

use crate::process_tree::{ConnectionSnapshot, ProcessTable};

const GREEN_BOLD: &str = "\x1b[1;32m";
const RED_BOLD: &str = "\x1b[1;31m";
const MAGENTA_BOLD: &str = "\x1b[1;35m";
const RESET: &str = "\x1b[0m";

/// Whether a service has a live, validated process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceState {
    /// A validated process is alive.
    Running,
    /// No process, or the recorded one was stale.
    Stopped,
}

/// Point-in-time view of one service. Computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    /// Service name.
    pub name: String,
    /// Running or stopped.
    pub state: ServiceState,
    /// Recorded process id, when running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Process creation time reported by the OS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Local>>,
    /// Declared ports followed by any others the process tree listens on.
    pub ports: Vec<String>,
    /// Number of stdout records in the service log.
    pub stdout_lines: usize,
    /// Number of stderr records in the service log.
    pub stderr_lines: usize,
}

impl ServiceStatus {
    /// Status of a service with no live process.
    pub fn stopped(name: impl Into<String>, (stdout_lines, stderr_lines): (usize, usize)) -> Self {
        Self {
            name: name.into(),
            state: ServiceState::Stopped,
            pid: None,
            started_at: None,
            ports: Vec::new(),
            stdout_lines,
            stderr_lines,
        }
    }

    /// Whether the service is running.
    pub fn is_running(&self) -> bool {
        self.state == ServiceState::Running
    }

    /// Human-readable time since the process started.
    pub fn uptime(&self) -> Option<String> {
        let started_at = self.started_at?;
        let elapsed = Local::now()
            .signed_duration_since(started_at)
            .to_std()
            .unwrap_or_default();
        Some(format_elapsed(elapsed.as_secs()))
    }
}

/// OS state shared by every service in one status sweep.
///
/// The process table is captured up front. The socket table is only read if
/// some running service needs port discovery, and then only once.
#[derive(Debug, Default)]
pub struct StatusSweep {
    processes: ProcessTable,
    connections: OnceLock<ConnectionSnapshot>,
}

impl StatusSweep {
    /// Starts a sweep from a fresh process table.
    pub fn capture() -> Self {
        Self {
            processes: ProcessTable::capture(),
            connections: OnceLock::new(),
        }
    }

    /// Sweep over explicit snapshots.
    pub fn from_parts(processes: ProcessTable, connections: ConnectionSnapshot) -> Self {
        Self {
            processes,
            connections: OnceLock::from(connections),
        }
    }

    /// The process table for this sweep.
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// The socket table for this sweep, captured on first use.
    pub fn connections(&self) -> &ConnectionSnapshot {
        self.connections.get_or_init(ConnectionSnapshot::capture)
    }
}

fn format_elapsed(total_seconds: u64) -> String {
    match total_seconds {
        0..=59 => format!("{} secs ago", total_seconds),
        60..=3_599 => format!("{} mins ago", total_seconds / 60),
        3_600..=86_399 => format!("{} hours ago", total_seconds / 3_600),
        86_400..=604_799 => format!("{} days ago", total_seconds / 86_400),
        _ => format!("{} weeks ago", total_seconds / 604_800),
    }
}

fn paint(text: &str, color: &str, enabled: bool) -> String {
    if enabled {
        format!("{color}{text}{RESET}")
    } else {
        text.to_string()
    }
}

/// Renders statuses as an aligned table, optionally colored.
pub fn render_table(statuses: &[ServiceStatus], color: bool) -> String {
    let headers = ["SERVICE", "STATE", "PID", "UPTIME", "PORTS", "OUT/ERR"];
    let rows: Vec<[String; 6]> = statuses
        .iter()
        .map(|status| {
            [
                status.name.clone(),
                status.state.to_string(),
                status.pid.map(|pid| pid.to_string()).unwrap_or_else(|| "-".into()),
                status.uptime().unwrap_or_else(|| "-".into()),
                if status.ports.is_empty() {
                    "-".into()
                } else {
                    status.ports.join(",")
                },
                format!("{}/{}", status.stdout_lines, status.stderr_lines),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let header_line = headers
        .iter()
        .zip(widths)
        .map(|(header, width)| format!("{header:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(&paint(header_line.trim_end(), MAGENTA_BOLD, color));
    out.push('\n');

    for (row, status) in rows.iter().zip(statuses) {
        let state_color = if status.is_running() { GREEN_BOLD } else { RED_BOLD };
        let cells: Vec<String> = row
            .iter()
            .zip(widths)
            .enumerate()
            .map(|(idx, (cell, width))| {
                let padded = format!("{cell:<width$}");
                if idx == 1 {
                    paint(&padded, state_color, color)
                } else {
                    padded
                }
            })
            .collect();
        out.push_str(cells.join("  ").trim_end());
        out.push('\n');
    }
    out
}

/// Renders statuses as a JSON array.
pub fn render_json(statuses: &[ServiceStatus]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(statuses)
}
