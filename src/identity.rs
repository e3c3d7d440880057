//! Persisted process identity.
//!
//! A service's PID survives across tool invocations as a one-line decimal
//! record. The record is only trusted after re-validation against the live
//! process table: the PID must be alive and its command line must contain the
//! service name. Anything else means the process crashed or the PID was reused,
//! and the record is discarded.
use std::{fs, io::ErrorKind, path::PathBuf};

use chrono::{DateTime, Local, TimeZone};
use tracing::{debug, warn};

use crate::error::PidFileError;
use crate::process_tree::ProcessTable;
use crate::runtime::Paths;

/// On-disk PID record for one service.
#[derive(Debug, Clone)]
pub struct PidRecord {
    service: String,
    path: PathBuf,
}

/// A PID record that passed re-validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    /// OS process id.
    pub pid: u32,
    /// Creation time reported by the OS.
    pub started_at: Option<DateTime<Local>>,
    /// The token found in the process command line (the service name).
    pub token: String,
}

impl PidRecord {
    /// Record for `service` under the given state paths.
    pub fn new(paths: &Paths, service: &str) -> Self {
        Self {
            service: service.to_string(),
            path: paths.pid_file(service),
        }
    }

    /// Location of the record.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Whether a record is present on disk.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Reads the recorded PID. A missing record is `None`; an unreadable number
    /// or zero is treated as stale and removed.
    pub fn load(&self) -> Result<Option<u32>, PidFileError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PidFileError::ReadError {
                    service: self.service.clone(),
                    source,
                });
            }
        };

        match contents.trim().parse::<u32>() {
            Ok(pid) if pid != 0 => Ok(Some(pid)),
            _ => {
                warn!(
                    "Discarding malformed PID file for '{}': {:?}",
                    self.service,
                    contents.trim()
                );
                self.clear()?;
                Ok(None)
            }
        }
    }

    /// Writes `pid` as the service's identity.
    pub fn save(&self, pid: u32) -> Result<(), PidFileError> {
        let write_error = |source| PidFileError::WriteError {
            service: self.service.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(&self.path, pid.to_string()).map_err(write_error)?;
        debug!("Recorded PID {pid} for '{}'", self.service);
        Ok(())
    }

    /// Removes the record. Removing an absent record is not an error.
    pub fn clear(&self) -> Result<(), PidFileError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Cleared PID file for '{}'", self.service);
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PidFileError::WriteError {
                service: self.service.clone(),
                source,
            }),
        }
    }

    /// Loads the record and validates it against `table`.
    ///
    /// Returns `None` (and clears the record) when the PID is not alive or its
    /// command line lacks the service name. The unrelated process is never touched.
    pub fn resolve(&self, table: &ProcessTable) -> Result<Option<ProcessIdentity>, PidFileError> {
        let Some(pid) = self.load()? else {
            return Ok(None);
        };

        if !table.is_alive(pid) {
            debug!("Process {pid} for '{}' was not found, resetting", self.service);
            self.clear()?;
            return Ok(None);
        }

        let cmdline = table.cmdline(pid).unwrap_or_default();
        if !cmdline.contains(&self.service) {
            warn!(
                "Process {pid} for '{}' was not as expected (found {:?}), resetting",
                self.service, cmdline
            );
            self.clear()?;
            return Ok(None);
        }

        let started_at = table
            .start_time(pid)
            .and_then(|secs| Local.timestamp_opt(secs as i64, 0).single());

        Ok(Some(ProcessIdentity {
            pid,
            started_at,
            token: self.service.clone(),
        }))
    }
}
