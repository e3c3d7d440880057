//! Runtime paths for persisted state and logs.
use std::{
    env,
    path::{Path, PathBuf},
};

use crate::constants::{
    HOME_ENV_VAR, LOG_DIR_NAME, LOG_FILE_EXTENSION, PID_DIR_NAME, PID_FILE_EXTENSION,
    USER_STATE_SUBDIR,
};

/// Where PID records and structured logs live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    state_dir: PathBuf,
    pid_dir: PathBuf,
    log_dir: PathBuf,
}

impl Paths {
    /// Resolves the state directory from `$TENDER_HOME`, falling back to
    /// `$HOME/.local/share/tender`.
    pub fn from_env() -> Self {
        if let Some(dir) = env::var_os(HOME_ENV_VAR).filter(|dir| !dir.is_empty()) {
            return Self::under(PathBuf::from(dir));
        }

        let home = env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self::under(home.join(USER_STATE_SUBDIR))
    }

    /// Roots every path under `state_dir`.
    pub fn under(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            pid_dir: state_dir.join(PID_DIR_NAME),
            log_dir: state_dir.join(LOG_DIR_NAME),
            state_dir,
        }
    }

    /// The root state directory.
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Directory of PID records.
    pub fn pid_dir(&self) -> &Path {
        &self.pid_dir
    }

    /// Directory of structured logs.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// PID record for `service`.
    pub fn pid_file(&self, service: &str) -> PathBuf {
        self.pid_dir
            .join(format!("{service}.{PID_FILE_EXTENSION}"))
    }

    /// Structured log for `service`.
    pub fn log_file(&self, service: &str) -> PathBuf {
        self.log_dir
            .join(format!("{service}.{LOG_FILE_EXTENSION}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_are_keyed_by_service_name() {
        let paths = Paths::under("/tmp/tender-state");
        assert_eq!(
            paths.pid_file("api"),
            PathBuf::from("/tmp/tender-state/pids/api.pid")
        );
        assert_eq!(
            paths.log_file("api"),
            PathBuf::from("/tmp/tender-state/logs/api.log")
        );
    }
}
