// Tracing subscriber setup
//
// The daemon's stdout belongs to the terminal, so its log goes to an
// append-only file in the runtime directory. RUST_LOG overrides the level.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Where log output ended up
#[derive(Debug)]
pub enum LogTarget {
    File,
    /// The log file could not be opened; carries the reason
    Stderr(std::io::Error),
}

/// Install the global subscriber, appending to `log_file`
///
/// Falls back to stderr when the file cannot be opened. Calling this twice is
/// harmless: the second subscriber is discarded.
pub fn init(log_file: &Path, default_level: &str) -> LogTarget {
    let (writer, target) = match open_log_file(log_file) {
        Ok(file) => (BoxMakeWriter::new(Arc::new(file)), LogTarget::File),
        Err(e) => (BoxMakeWriter::new(std::io::stderr), LogTarget::Stderr(e)),
    };

    let _ = tracing_subscriber::registry()
        .with(build_filter(default_level))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init();

    target
}

/// Stderr-only subscriber for short-lived processes
pub fn init_stderr(default_level: &str) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(default_level))
        .with(fmt::layer().with_writer(std::io::stderr).without_time())
        .try_init();
}

/// RUST_LOG when set and valid, otherwise `default_level`
pub fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
