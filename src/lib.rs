//! Tender supervises developer-launched local services: it builds them, launches
//! them detached, verifies they actually came up, reports their status across
//! invocations and tears them down without touching unrelated processes.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Shared constants and timings.
pub mod constants;

/// Error handling.
pub mod error;

/// Uniform operations over services and groups.
pub mod group;

/// Persisted process identity.
pub mod identity;

/// Launch readiness checks.
pub mod launch_check;

/// Structured service logs.
pub mod logs;

/// Process and socket table introspection.
pub mod process_tree;

/// The wrapper process that owns a launched service.
pub mod runner;

/// State directory layout.
pub mod runtime;

/// Per-service lifecycle.
pub mod service;

/// Status reporting.
pub mod status;

/// Escalating shutdown.
pub mod termination;
