//! Tracing setup.
//!
//! Logs go to stdout through a compact formatter, filtered by `RUST_LOG`
//! (default `info`). Setting `MEDSCRIBE_LOG_FILE` adds a second layer that
//! appends the same stream to that file through a non-blocking writer, so
//! pipeline workers never stall on log IO.

use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Keeps the non-blocking writer's flush thread alive for the process.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global tracing subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    match file_writer() {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

/// Non-blocking writer for the `MEDSCRIBE_LOG_FILE` target, when configured.
///
/// An unopenable path is reported on stderr and logging continues on stdout
/// alone; a bad log destination should not stop the service.
fn file_writer() -> Option<NonBlocking> {
    let path = std::env::var("MEDSCRIBE_LOG_FILE").ok()?;
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        Err(err) => {
            eprintln!("Failed to open log file {path}: {err}");
            None
        }
    }
}
