//! Structured logging for the hashlist ingester
//!
//! This module provides:
//! 1. Subscriber setup (console + daily rolling file, JSON or line format)
//! 2. Event helpers for commits and snapshot files with consistent fields

use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::{Subscriber, debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self as tracing_fmt, format::FmtSpan, time::ChronoUtc},
    prelude::*,
};

use crate::hashlist::config_loader::Logging;

const LOG_FILE_PREFIX: &str = "hashlist_ingest.log";

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

/// Category attached to every structured event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEntryType {
    Commit,
    Snapshot,
    System,
}

impl fmt::Display for LogEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEntryType::Commit => write!(f, "commit"),
            LogEntryType::Snapshot => write!(f, "snapshot"),
            LogEntryType::System => write!(f, "system"),
        }
    }
}

/// What happened to one snapshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    AlreadyProcessed,
    FetchFailed,
    NoFragment,
    DecodeFailed,
    Malformed,
    Stored,
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotStatus::AlreadyProcessed => write!(f, "already_processed"),
            SnapshotStatus::FetchFailed => write!(f, "fetch_failed"),
            SnapshotStatus::NoFragment => write!(f, "no_fragment"),
            SnapshotStatus::DecodeFailed => write!(f, "decode_failed"),
            SnapshotStatus::Malformed => write!(f, "malformed"),
            SnapshotStatus::Stored => write!(f, "stored"),
        }
    }
}

/// Install the global subscriber. The returned guard flushes the file writer
/// on drop and must live as long as the process logs.
pub fn init_logging(logging: &Logging, log_dir: &Path) -> LoggerResult<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.log_level))
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    let mut layers = Vec::new();
    let mut guard = None;

    if logging.log_to_terminal {
        layers.push(tracing_fmt::layer().with_target(false).boxed());
    }

    if logging.log_to_file {
        if !log_dir.exists() {
            std::fs::create_dir_all(log_dir)?;
        }
        let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        layers.push(file_layer(&logging.log_format, non_blocking));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    info!(
        log_format = %logging.log_format,
        log_level = %logging.log_level,
        log_to_file = logging.log_to_file,
        "Logger initialized",
    );

    Ok(guard)
}

fn file_layer<S>(
    format: &str,
    writer: tracing_appender::non_blocking::NonBlocking,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match format {
        "json" => tracing_fmt::layer()
            .json()
            .with_writer(writer)
            .with_timer(ChronoUtc::rfc_3339())
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        _ => tracing_fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_timer(ChronoUtc::rfc_3339())
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    }
}

/// Log the outcome of one processed commit
pub fn log_commit(pass: &str, sha: &str, files_processed: usize, streams_created: usize) {
    info!(
        entry_type = %LogEntryType::Commit,
        pass = pass,
        commit = sha,
        files = files_processed,
        stored = streams_created,
        "Processed {} commit {}",
        pass,
        sha,
    );
}

/// Log the outcome of one snapshot file
pub fn log_snapshot(commit: &str, path: &str, blob: Option<&str>, status: SnapshotStatus, detail: Option<&str>) {
    match status {
        SnapshotStatus::FetchFailed | SnapshotStatus::DecodeFailed | SnapshotStatus::Malformed => warn!(
            entry_type = %LogEntryType::Snapshot,
            commit = commit,
            path = path,
            blob = blob,
            status = %status,
            detail = detail,
            "Snapshot {} skipped: {}",
            path,
            status,
        ),
        _ => debug!(
            entry_type = %LogEntryType::Snapshot,
            commit = commit,
            path = path,
            blob = blob,
            status = %status,
            detail = detail,
            "Snapshot {}: {}",
            path,
            status,
        ),
    }
}

/// Log a lifecycle event such as a lock acquisition or a reset
pub fn log_system_event(event_type: &str, details: &str) {
    info!(
        entry_type = %LogEntryType::System,
        event_type = event_type,
        details = details,
        "System event: {}",
        event_type,
    );
}
