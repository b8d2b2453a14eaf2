//! Well-known locations of the tool: application identity, the machine-wide
//! data directory holding the config cache and log file, and the rig identity
//! read from the environment.

// External crates
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Project name on the configuration and log servers.
pub const APP_NAME: &str = "meso_prepare_transfer";
/// Directory level above the application in the site data directory.
pub const ORGANIZATION: &str = "AllenInstitute";
/// Crate version, reported to the log server.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Overrides the data directory, mainly for tests and non-rig machines.
pub const DATA_DIR_ENV: &str = "MESO_PREPARE_TRANSFER_DATA_DIR";

/// Site-wide data directory, created if missing.
///
/// On Windows this resolves to `C:\ProgramData\AllenInstitute\meso_prepare_transfer`.
pub fn data_dir() -> io::Result<PathBuf> {
    let dir = match env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => site_data_dir(),
    };
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(windows)]
fn site_data_dir() -> PathBuf {
    let program_data =
        env::var_os("PROGRAMDATA").map_or_else(|| PathBuf::from(r"C:\ProgramData"), PathBuf::from);
    program_data.join(ORGANIZATION).join(APP_NAME)
}

#[cfg(target_os = "macos")]
fn site_data_dir() -> PathBuf {
    PathBuf::from("/Library/Application Support").join(APP_NAME)
}

#[cfg(all(not(windows), not(target_os = "macos")))]
fn site_data_dir() -> PathBuf {
    let base = env::var("XDG_DATA_DIRS")
        .ok()
        .and_then(|dirs| {
            dirs.split(':')
                .find(|d| !d.is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from("/usr/local/share"));
    base.join(APP_NAME)
}

/// Last configuration document received from the server.
pub fn config_cache_file(data_dir: &Path) -> PathBuf {
    data_dir.join("config").join("config_server_response.json")
}

/// Directory of the rotating log file.
pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// `meso_prepare_transfer.log`
pub fn log_file_name() -> String {
    format!("{APP_NAME}.log")
}

/// Identity of the machine and rig the tool runs on, as published by the
/// rig environment (`aibs_rig_id`, `aibs_comp_id`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RigIdentity {
    /// Rig name, `aibs_rig_id`.
    pub rig_id: String,
    /// Acquisition computer name, `aibs_comp_id`. The configuration
    /// server keys rig documents by it.
    pub comp_id: String,
}

impl RigIdentity {
    /// Read both variables, `unknown` when unset.
    pub fn from_env() -> Self {
        let read = |key: &str| env::var(key).unwrap_or_else(|_| "unknown".to_string());
        Self {
            rig_id: read("aibs_rig_id"),
            comp_id: read("aibs_comp_id"),
        }
    }
}
