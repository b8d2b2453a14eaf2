// Local crates
use crate::helpers::app_dirs::log_file_name;
use crate::shipper::record::LogServerIdentity;
use crate::shipper::shipper::{LogServerHandle, LogServerLayer, START_STOP_TARGET};

// External crates
use anyhow::{Context, Result};
use std::panic;
use std::path::Path;
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_error::ErrorLayer;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*, registry::Registry};

/// Keeps the logging backends alive for the lifetime of the process.
#[derive(Debug)]
pub struct TracingGuards {
    /// Attached once the settings name a log server, disabled otherwise.
    pub log_server: LogServerHandle,
    _file_guard: WorkerGuard,
}

/// Install the global subscriber
///
/// - stderr, human readable, with span context
/// - `<log_dir>/meso_prepare_transfer.log`, same layout without colors
/// - the log server, buffered until [`crate::shipper::shipper::Shipper::attach`]
pub fn init_tracing(log_dir: &Path, identity: LogServerIdentity) -> Result<TracingGuards> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = rolling::never(log_dir, log_file_name());
    let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer()
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let log_server = LogServerHandle::new();
    let log_server_layer = LogServerLayer::new(log_server.clone(), identity);

    let subscriber = Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .with(log_server_layer)
        .with(ErrorLayer::default());

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    Ok(TracingGuards {
        log_server,
        _file_guard: file_guard,
    })
}

/// Route panics through `tracing` so they reach the log file.
pub fn init_panic_handler() {
    panic::set_hook(Box::new(|panic_info| {
        let msg = match panic_info.payload().downcast_ref::<&str>() {
            Some(s) => (*s).to_string(),
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => s.clone(),
                None => "Unknown panic".to_string(),
            },
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            message = %msg,
            location = %location,
            "Application panicked!"
        );
    }));
}

/// `START_STOP` marker opening a run on the log server.
pub fn log_start() {
    tracing::warn!(target: START_STOP_TARGET, "Action, Start");
}

/// `START_STOP` marker closing a run on the log server.
pub fn log_stop() {
    tracing::warn!(target: START_STOP_TARGET, "Action, Stop");
}
