//! Prepares a mesoscope session for transfer off-rig: schema metadata files in
//! the session directory and a transfer manifest for the watchdog service.

/// Command-line interface.
pub mod cli;
/// Configuration and well-known paths.
pub mod helpers;
/// Logging setup.
pub mod instrumentation;
/// Watchdog transfer manifests.
pub mod manifest;
/// Session processing and the run entry point.
pub mod runtime;
/// Metadata files written next to the data.
pub mod schema;
/// Forwarding of log records to the rig log server.
pub mod shipper;
/// Acquisition timing from sync recordings.
pub mod sync;
