//! Runtime - one prepare-transfer run
//!
//! Resolves the configuration, wires the log server, and processes the
//! requested session: platform.json, behavior camera metadata, acquisition
//! window, schema files, then the watchdog manifest.

// Local crates
use crate::{
    helpers::{
        app_dirs::{APP_NAME, RigIdentity, config_cache_file},
        load_config::{Settings, SettingsOverrides},
        source_config::{config_server_url, fetch_config_from_server},
    },
    instrumentation::tracing::{log_start, log_stop},
    manifest::manifest::{ManifestError, generate_watchdog_manifest},
    schema::{
        SchemaError,
        data_description::{DataDescriptionInput, RawDataDescription},
        session::{Session, SessionInput, camera_name},
    },
    shipper::shipper::{LogServerHandle, Shipper, ShipperConfig},
    sync::sync::{AcquisitionWindow, SyncError, get_start_end_times},
};

// External crates
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{Instrument, instrument};
use walkdir::WalkDir;

/// Project name for OpenScope sessions in the data schema.
pub const OPENSCOPE_PROJECT: &str = "OpenScope";
/// Project name for every other mesoscope session.
pub const LEARNING_MFISH_PROJECT: &str = "Learning mFISH-V1omFISH";

/// Behavior cameras expected per session.
const EXPECTED_CAMERAS: usize = 3;

/// Reasons a session cannot be prepared.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// No `*platform.json` in the session directory.
    #[error("no platform.json found in {0:?}")]
    PlatformNotFound(PathBuf),
    /// Reading the session directory failed.
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// platform.json is not valid JSON.
    #[error("failed to parse {path:?}: {source}")]
    PlatformJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// A required platform.json field is missing or not a string.
    #[error("{path:?} has no usable {field:?}")]
    PlatformField { path: PathBuf, field: &'static str },
    /// No behavior camera metadata was found for the session.
    #[error("no camera json files for session {session_id} in {directory:?}")]
    NoCameraFiles {
        session_id: String,
        directory: PathBuf,
    },
    /// The settings list no investigators for this project.
    #[error("no investigators configured for project {0:?}")]
    MissingInvestigators(String),
    /// Acquisition start is not before its end.
    #[error("acquisition ends ({end}) before it starts ({start})")]
    InvalidWindow {
        start: chrono::NaiveDateTime,
        end: chrono::NaiveDateTime,
    },
    /// The acquisition window could not be derived from the sync file.
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// A metadata file failed to build, validate or write.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// The transfer manifest could not be written.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Who asked for which session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Full name of the operator.
    pub username: String,
    /// Acquisition directory name below `acquisition_dir`.
    pub session_id: String,
}

/// Subject and project of a session, as recorded by the rig in platform.json.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    /// Mouse identifier.
    pub subject_id: String,
    /// Project code as entered on the rig.
    pub project_code: String,
}

/// Where the acquisition window comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingSource {
    /// Given on the command line.
    Explicit(AcquisitionWindow),
    /// Decoded from the session's sync recording.
    SyncFile,
}

impl TimingSource {
    /// Acquisition window of the session in `data_directory`.
    pub fn resolve(&self, data_directory: &Path) -> Result<AcquisitionWindow, DatasetError> {
        let window = match self {
            TimingSource::Explicit(window) => *window,
            TimingSource::SyncFile => get_start_end_times(data_directory)?,
        };
        if window.end < window.start {
            return Err(DatasetError::InvalidWindow {
                start: window.start,
                end: window.end,
            });
        }
        Ok(window)
    }
}

/// Everything a successful run wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedDataset {
    /// Subject and project read from platform.json.
    pub platform: PlatformInfo,
    /// Data-schema project name.
    pub project_name: String,
    /// Acquisition window used for both metadata files.
    pub window: AcquisitionWindow,
    /// Written `session.json`.
    pub session_file: PathBuf,
    /// Written `data_description.json`.
    pub data_description_file: PathBuf,
    /// Written `data_description.csv`.
    pub data_description_csv: PathBuf,
    /// Written watchdog manifest.
    pub manifest_file: PathBuf,
}

/// Options of a default (non-subcommand) run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Operator and session.
    pub request: SessionRequest,
    /// `MESO_PREPARE_TRANSFER__*` values.
    pub env_overrides: SettingsOverrides,
    /// Command-line values, applied last.
    pub overrides: SettingsOverrides,
    /// Configuration server, overriding `ALLENINST_CONFIG_API_URL`.
    pub config_url: Option<String>,
    /// Use the cached document without contacting the server.
    pub offline: bool,
    /// Explicit acquisition window; the sync file is read when unset.
    pub window: Option<AcquisitionWindow>,
}

/// Read subject and project code from the first `*platform.json` below
/// `data_directory`.
pub fn parse_platform_json(data_directory: &Path) -> Result<PlatformInfo, DatasetError> {
    let path = WalkDir::new(data_directory)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .find(|e| e.file_name().to_string_lossy().ends_with("platform.json"))
        .map(|e| e.into_path())
        .ok_or_else(|| DatasetError::PlatformNotFound(data_directory.to_path_buf()))?;

    tracing::debug!(
        platform_json = %path.display(),
        "Parsing platform.json for subject and project ID"
    );

    let body = fs::read_to_string(&path).map_err(|source| DatasetError::Io {
        path: path.clone(),
        source,
    })?;
    let document: Value =
        serde_json::from_str(&body).map_err(|source| DatasetError::PlatformJson {
            path: path.clone(),
            source,
        })?;

    let field = |name: &'static str| match document.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(DatasetError::PlatformField {
            path: path.clone(),
            field: name,
        }),
    };

    Ok(PlatformInfo {
        subject_id: field("subject_id")?,
        project_code: field("project_code")?,
    })
}

/// Behavior camera metadata files `<session_id>*.json`, sorted.
pub fn find_camera_jsons(
    behavior_video_dir: &Path,
    session_id: &str,
) -> Result<Vec<PathBuf>, DatasetError> {
    let pattern = glob::Pattern::new(&format!("{}*.json", glob::Pattern::escape(session_id)))
        .map_err(|e| DatasetError::Io {
            path: behavior_video_dir.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;

    let entries = match fs::read_dir(behavior_video_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(DatasetError::Io {
                path: behavior_video_dir.to_path_buf(),
                source,
            });
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .filter(|e| pattern.matches(&e.file_name().to_string_lossy()))
        .map(|e| e.path())
        .collect();
    files.sort();
    Ok(files)
}

/// Data-schema project name for a platform.json project code.
pub fn data_schema_project_name(project_code: &str) -> &'static str {
    if project_code.contains(OPENSCOPE_PROJECT) {
        OPENSCOPE_PROJECT
    } else {
        LEARNING_MFISH_PROJECT
    }
}

/// Paths of the schema files written for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFiles {
    /// `session.json`
    pub session: PathBuf,
    /// `data_description.json`
    pub data_description: PathBuf,
    /// `data_description.csv`
    pub data_description_csv: PathBuf,
}

/// Write session.json, data_description.json and data_description.csv into
/// the session directory.
#[instrument(
    name = "metadata::generate",
    target = "runtime::runtime",
    skip_all,
    level = "debug"
)]
pub fn generate_aind_metadata(
    request: &SessionRequest,
    platform: &PlatformInfo,
    project_name: &str,
    window: AcquisitionWindow,
    camera_jsons: &[PathBuf],
    settings: &Settings,
) -> Result<MetadataFiles, DatasetError> {
    let data_directory = settings.session_directory(&request.session_id);
    let rig = RigIdentity::from_env();

    // Both documents are built and checked before anything lands on disk.
    let investigators = settings
        .investigators
        .get(project_name)
        .filter(|names| !names.is_empty())
        .ok_or_else(|| DatasetError::MissingInvestigators(project_name.to_string()))?;

    let mut camera_names: Vec<String> = camera_jsons
        .iter()
        .filter_map(|p| p.file_name())
        .filter_map(|n| camera_name(&request.session_id, &n.to_string_lossy()))
        .collect();
    camera_names.sort();
    camera_names.dedup();

    let session = Session::new_mesoscope(SessionInput {
        session_id: &request.session_id,
        experimenter: &request.username,
        subject_id: &platform.subject_id,
        rig_id: &rig.rig_id,
        start: window.start,
        end: window.end,
        camera_names,
    });
    session.validate()?;

    let description = RawDataDescription::new_mesoscope(DataDescriptionInput {
        subject_id: &platform.subject_id,
        creation_time: window.start,
        project_name,
        investigators,
        data_summary: &platform.project_code,
    })
    .revalidated()?;

    tracing::info!("Generating Session Json");
    let session_file = session.write_standard_file(&data_directory)?;

    tracing::info!("Generating Data Description Json");
    Ok(MetadataFiles {
        session: session_file,
        data_description: description.write_standard_file(&data_directory)?,
        data_description_csv: description.write_csv(&data_directory)?,
    })
}

/// Generate metadata and the transfer manifest for one session.
pub fn process_dataset(
    request: &SessionRequest,
    settings: &Settings,
    timing: &TimingSource,
) -> Result<ProcessedDataset, DatasetError> {
    tracing::info!("Processing dataset");
    let data_directory = settings.session_directory(&request.session_id);
    let platform = parse_platform_json(&data_directory)?;

    let span = tracing::info_span!(
        "dataset",
        subject_id = %platform.subject_id,
        project_id = %platform.project_code
    );
    let _entered = span.enter();

    let camera_jsons = find_camera_jsons(&settings.behavior_video_dir, &request.session_id)?;
    if camera_jsons.is_empty() {
        tracing::error!("No camera json files found");
        return Err(DatasetError::NoCameraFiles {
            session_id: request.session_id.clone(),
            directory: settings.behavior_video_dir.clone(),
        });
    } else if camera_jsons.len() < EXPECTED_CAMERAS {
        tracing::info!(cameras = camera_jsons.len(), "Less than 3 camera jsons found");
    }

    let window = timing.resolve(&data_directory)?;
    let project_name = data_schema_project_name(&platform.project_code);

    let metadata = generate_aind_metadata(
        request,
        &platform,
        project_name,
        window,
        &camera_jsons,
        settings,
    )?;

    let manifest_file = generate_watchdog_manifest(
        &request.session_id,
        &platform.subject_id,
        project_name,
        &request.username,
        window.start,
        settings,
    )?;

    Ok(ProcessedDataset {
        platform,
        project_name: project_name.to_string(),
        window,
        session_file: metadata.session,
        data_description_file: metadata.data_description,
        data_description_csv: metadata.data_description_csv,
        manifest_file,
    })
}

/// Fetch (or read the cached) configuration and apply env and CLI overrides.
///
/// Precedence, lowest first: built-in defaults, the served (or cached)
/// document, `env_overrides`, `cli_overrides`.
pub async fn resolve_settings(
    config_url: Option<&str>,
    offline: bool,
    env_overrides: SettingsOverrides,
    cli_overrides: SettingsOverrides,
    data_dir: &Path,
    rig: &RigIdentity,
) -> Result<Settings> {
    let cache_file = config_cache_file(data_dir);

    let config_file = if offline {
        tracing::info!(cache_file = %cache_file.display(), "Offline, using cached config");
        if !cache_file.is_file() {
            anyhow::bail!("No cached configuration at {}", cache_file.display());
        }
        cache_file
    } else {
        let url = config_url.map_or_else(config_server_url, str::to_string);
        tracing::info!("Fetching meso-prepare-transfer config from server");
        fetch_config_from_server(&url, APP_NAME, &rig.comp_id, &cache_file)
            .await
            .context("Failed to obtain configuration")?
    };

    Ok(Settings::load(&config_file)?.apply(env_overrides.merge(cli_overrides)))
}

/// Hand buffered and future records to the log server named in `settings`.
fn attach_log_server(log_server: &LogServerHandle, settings: &Settings) -> Option<Shipper> {
    if settings.logserver_url.trim().is_empty() {
        tracing::debug!("No log server configured");
        log_server.disable();
        return None;
    }

    match Shipper::attach(log_server, &settings.logserver_url, ShipperConfig::default()) {
        Ok(shipper) => Some(shipper),
        Err(e) => {
            tracing::warn!(error = %e, "Log server disabled");
            log_server.disable();
            None
        }
    }
}

/// Full prepare-transfer run for one session.
pub async fn run_prepare_transfer(
    options: RunOptions,
    log_server: &LogServerHandle,
    data_dir: &Path,
    rig: &RigIdentity,
) -> Result<ExitCode> {
    let settings = match resolve_settings(
        options.config_url.as_deref(),
        options.offline,
        options.env_overrides,
        options.overrides,
        data_dir,
        rig,
    )
    .await
    {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Could not obtain configuration");
            log_server.disable();
            return Err(e);
        }
    };

    let mut shipper = attach_log_server(log_server, &settings);

    let span = tracing::info_span!(
        "session",
        session_id = %options.request.session_id,
        username = %options.request.username
    );

    let timing = options
        .window
        .map_or(TimingSource::SyncFile, TimingSource::Explicit);
    let request = options.request;

    let exit_code = async {
        log_start();

        let blocking_span = tracing::Span::current();
        let outcome = tokio::task::spawn_blocking(move || {
            let _entered = blocking_span.enter();
            process_dataset(&request, &settings, &timing)
        })
        .await;

        let code = match outcome {
            Ok(Ok(processed)) => {
                tracing::info!(
                    manifest = %processed.manifest_file.display(),
                    project_name = %processed.project_name,
                    "Dataset ready for transfer"
                );
                ExitCode::SUCCESS
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Could not process dataset");
                ExitCode::FAILURE
            }
            Err(e) => {
                tracing::error!(error = %e, "Dataset processing task failed");
                ExitCode::FAILURE
            }
        };

        log_stop();
        code
    }
    .instrument(span)
    .await;

    if let Some(shipper) = shipper.as_mut() {
        if let Err(e) = shipper.shutdown().await {
            tracing::warn!(error = %e, "Log server records may be lost");
        }
    }

    Ok(exit_code)
}
