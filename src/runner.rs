//! The wrapper process that owns a launched service.
//!
//! Launch re-executes `tender run --service <name> --log <path> -- <command>`
//! in a fresh session. The runner is the process group leader and the pid on
//! record; it runs the command through the shell, turns its output into
//! structured log records, and exits with the command's status.
use std::{
    os::unix::process::ExitStatusExt,
    path::Path,
    process::{Command, Stdio},
    sync::atomic::{AtomicBool, Ordering},
};

use libc::{SIGINT, getpgrp, killpg};
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_SHELL, SHELL_COMMAND_FLAG};
use crate::error::TenderError;
use crate::logs::{LogStream, open_sink, spawn_log_writer};

static INTERRUPT_FORWARDED: AtomicBool = AtomicBool::new(false);

/// Runs `command` for `service`, logging its output to `log_path`.
/// Returns the exit code the runner should exit with.
pub fn run_service(service: &str, log_path: &Path, command: &str) -> Result<i32, TenderError> {
    let sink = open_sink(log_path).map_err(|source| TenderError::LogError {
        service: service.to_string(),
        source,
    })?;

    register_interrupt_forwarding(service);

    debug!("Runner for '{service}' executing `{command}`");
    let mut child = Command::new(DEFAULT_SHELL)
        .arg(SHELL_COMMAND_FLAG)
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| TenderError::ServiceStartError {
            service: service.to_string(),
            source,
        })?;

    let mut writers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        writers.push(spawn_log_writer(out, LogStream::Stdout, sink.clone()));
    }
    if let Some(err) = child.stderr.take() {
        writers.push(spawn_log_writer(err, LogStream::Stderr, sink));
    }

    let status = child.wait().map_err(|source| TenderError::ServiceStartError {
        service: service.to_string(),
        source,
    })?;
    for writer in writers {
        if writer.join().is_err() {
            warn!("Log writer for '{service}' panicked");
        }
    }

    let code = match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    };
    info!("Service '{service}' exited with status {code}");
    Ok(code)
}

/// Relays SIGINT/SIGTERM to the whole process group so forked descendants see
/// the interrupt too. The runner's own copy of the relayed signal is absorbed.
fn register_interrupt_forwarding(service: &str) {
    let service = service.to_string();
    let result = ctrlc::set_handler(move || {
        if INTERRUPT_FORWARDED.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Forwarding interrupt to '{service}'");
        unsafe {
            killpg(getpgrp(), SIGINT);
        }
    });
    if let Err(err) = result {
        warn!("Failed to install interrupt forwarding: {err}");
    }
}
