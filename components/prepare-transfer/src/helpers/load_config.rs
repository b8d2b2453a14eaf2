// External crates
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Prefix for environment overrides, e.g. `MESO_PREPARE_TRANSFER__ACQUISITION_DIR`.
pub const ENV_PREFIX: &str = "MESO_PREPARE_TRANSFER";

/// Runtime configuration of meso-prepare-transfer.
///
/// Every field has a rig default; the document served by the configuration
/// server only needs to carry what differs. Unknown keys are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// `host:port` of the log server. Empty disables log forwarding.
    pub logserver_url: String,
    /// Parent of the per-session acquisition directories.
    pub acquisition_dir: PathBuf,
    /// Shared directory the behavior cameras write to.
    pub behavior_video_dir: PathBuf,
    /// Directory watched by the watchdog service.
    pub manifest_directory: PathBuf,
    /// Schema files listed in the manifest. Entries that are not existing
    /// files are resolved against the session directory.
    pub schemas: Vec<String>,
    /// Fixed manifest fields.
    pub watchdog_manifest_kwargs: WatchdogManifestSettings,
    /// Investigators per data-schema project name.
    pub investigators: BTreeMap<String, Vec<String>>,
    /// Files the transfer service is expected to move, per modality. Glob
    /// patterns are matched recursively.
    pub modalities: BTreeMap<String, Vec<String>>,
}

/// Manifest fields that are fixed per rig rather than derived from a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchdogManifestSettings {
    /// Time of day to start the transfer, immediately when unset.
    pub schedule_time: Option<String>,
    /// Destination share of the transfer.
    pub destination: String,
    /// Platform abbreviation, e.g. `multiplane-ophys`.
    pub platform: String,
    /// Job type the transfer service runs after upload.
    pub transfer_service_job_type: String,
    /// Remove the rig copy once the upload succeeded.
    pub delete_modalities_source_after_success: bool,
    /// Upload even if the dataset already exists in the cloud.
    pub force_cloud_sync: bool,
    /// Transfer service endpoint, the service default when unset.
    pub transfer_endpoint: Option<String>,
    /// Bucket the dataset is uploaded to.
    pub s3_bucket: String,
    /// Processing capsule to trigger after upload.
    pub capsule_id: Option<String>,
    /// Mount point of the processing capsule.
    pub mount: Option<String>,
}

impl Default for WatchdogManifestSettings {
    fn default() -> Self {
        Self {
            schedule_time: Some("03:00:00".to_string()),
            destination: "//allen/aind/scratch/2p-working-group/data-uploads".to_string(),
            platform: "multiplane-ophys".to_string(),
            transfer_service_job_type: "multi_pophys_suite2p_cellpose".to_string(),
            delete_modalities_source_after_success: false,
            force_cloud_sync: false,
            transfer_endpoint: Some(
                "http://aind-data-transfer-service/api/v1/submit_jobs".to_string(),
            ),
            s3_bucket: "private".to_string(),
            capsule_id: None,
            mount: None,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Settings {
    fn default() -> Self {
        let investigators = BTreeMap::from([
            (
                "Learning mFISH-V1omFISH".to_string(),
                strings(&[
                    "Marina Garrett",
                    "Peter Groblewski",
                    "Anton Arkhipov",
                    "Omid Zobeiri",
                ]),
            ),
            ("OpenScope".to_string(), strings(&["Jerome Lecoq"])),
        ]);

        let modalities = BTreeMap::from([
            (
                "pophys".to_string(),
                strings(&[
                    "*_averaged_depth.tiff",
                    "*_averaged_surface.tiff",
                    "*cortical_z_stack*.tiff",
                    "*fullfield.roi",
                    "*fullfield.tiff",
                    "*local_z_stack*.tiff",
                    "*platform.json",
                    "*reticle.tif",
                    "*surface.roi",
                    "*timeseries.roi",
                    "*timeseries.tiff",
                    "*vasculature.tif",
                    "*_timeseries_Motion*.csv",
                    "*_timeseries_Motion_Corrected*.csv",
                    "parent_session_depth_images/*_depth.tif",
                    "parent_session_surface_images/*_surface.tif",
                    "sorted_local_z_stacks/*.tif",
                ]),
            ),
            (
                "behavior-videos".to_string(),
                strings(&[
                    "*Behavior*.mp4",
                    "*Face*.mp4",
                    "*Eye*.mp4",
                    "*Behavior*.json",
                    "*Face*.json",
                    "*Eye*.json",
                    "*Nose*.mp4",
                    "*Nose*.json",
                ]),
            ),
            (
                "behavior".to_string(),
                strings(&["*stim.pkl", "*stim_table.csv", "*sync.h5"]),
            ),
        ]);

        Self {
            logserver_url: "eng-logtools.corp.alleninstitute.org:9000".to_string(),
            acquisition_dir: PathBuf::from("D:/scanimage_ophys/data"),
            behavior_video_dir: PathBuf::from("//W10SV109650002/mvr/data"),
            manifest_directory: PathBuf::from(
                "C:/Users/svc_mesoscope/Documents/aind_watchdog_service/manifest",
            ),
            schemas: strings(&[
                "C:/ProgramData/aind/rig.json",
                "session.json",
                "data_description.json",
            ]),
            watchdog_manifest_kwargs: WatchdogManifestSettings::default(),
            investigators,
            modalities,
        }
    }
}

/// Scalar settings that may be overridden from the environment or the CLI.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SettingsOverrides {
    /// See [`Settings::logserver_url`].
    pub logserver_url: Option<String>,
    /// See [`Settings::acquisition_dir`].
    pub acquisition_dir: Option<PathBuf>,
    /// See [`Settings::behavior_video_dir`].
    pub behavior_video_dir: Option<PathBuf>,
    /// See [`Settings::manifest_directory`].
    pub manifest_directory: Option<PathBuf>,
}

impl SettingsOverrides {
    /// Read `MESO_PREPARE_TRANSFER__*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_env_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
    }

    /// Same as [`SettingsOverrides::from_env`], reading `vars` instead of the
    /// process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        Self::from_env_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .source(Some(vars)),
        )
    }

    fn from_env_source(source: config::Environment) -> Result<Self> {
        let overrides = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to collect environment overrides")?
            .try_deserialize::<SettingsOverrides>()
            .context("Failed to parse environment overrides")?;
        Ok(overrides)
    }

    /// Values set in `higher` win over values set in `self`.
    pub fn merge(self, higher: SettingsOverrides) -> Self {
        Self {
            logserver_url: higher.logserver_url.or(self.logserver_url),
            acquisition_dir: higher.acquisition_dir.or(self.acquisition_dir),
            behavior_video_dir: higher.behavior_video_dir.or(self.behavior_video_dir),
            manifest_directory: higher.manifest_directory.or(self.manifest_directory),
        }
    }
}

impl Settings {
    /// Parse a configuration document as served by the configuration server.
    pub fn from_json_str(document: &str) -> Result<Self> {
        let settings: Settings =
            serde_json::from_str(document).context("Failed to parse configuration document")?;
        Ok(settings)
    }

    /// Load and parse the cached configuration document
    #[instrument(
        name = "config_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        tracing::trace!(
            configuration_file_path = %path_ref.display(),
            "Loading meso-prepare-transfer configuration"
        );

        let config_str = match fs::read_to_string(path_ref) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read configuration file");
                return Err(e)
                    .with_context(|| format!("Failed to read config file at {:?}", path_ref));
            }
        };
        let settings = match Self::from_json_str(&config_str) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to parse JSON configuration");
                return Err(e).with_context(|| format!("Failed to parse JSON from {:?}", path_ref));
            }
        };

        tracing::trace!(
            configuration_file_path = %path_ref.display(),
            "Configuration loaded successfully"
        );
        Ok(settings)
    }

    /// Replace the fields set in `overrides`.
    pub fn apply(mut self, overrides: SettingsOverrides) -> Self {
        if let Some(url) = overrides.logserver_url {
            self.logserver_url = url;
        }
        if let Some(dir) = overrides.acquisition_dir {
            self.acquisition_dir = dir;
        }
        if let Some(dir) = overrides.behavior_video_dir {
            self.behavior_video_dir = dir;
        }
        if let Some(dir) = overrides.manifest_directory {
            self.manifest_directory = dir;
        }
        self
    }

    /// Directory holding one acquisition session.
    pub fn session_directory(&self, session_id: &str) -> PathBuf {
        self.acquisition_dir.join(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_document_keeps_defaults() {
        let settings = Settings::from_json_str(
            r#"{"acquisition_dir": "E:/data", "unknown_key": 3, "schemas": ["session.json"]}"#,
        )
        .unwrap();

        assert_eq!(settings.acquisition_dir, PathBuf::from("E:/data"));
        assert_eq!(settings.schemas, vec!["session.json".to_string()]);
        assert_eq!(settings.logserver_url, Settings::default().logserver_url);
        assert!(settings.investigators.contains_key("Learning mFISH-V1omFISH"));
        assert_eq!(settings.watchdog_manifest_kwargs.platform, "multiplane-ophys");
    }

    #[test]
    fn partial_manifest_kwargs_keep_defaults() {
        let settings = Settings::from_json_str(
            r#"{"watchdog_manifest_kwargs": {"schedule_time": null, "destination": "//share"}}"#,
        )
        .unwrap();

        let kwargs = settings.watchdog_manifest_kwargs;
        assert_eq!(kwargs.schedule_time, None);
        assert_eq!(kwargs.destination, "//share");
        assert_eq!(kwargs.transfer_service_job_type, "multi_pophys_suite2p_cellpose");
    }

    #[test]
    fn default_modalities_cover_all_streams() {
        let keys: Vec<_> = Settings::default().modalities.into_keys().collect();
        assert_eq!(keys, vec!["behavior", "behavior-videos", "pophys"]);
    }

    #[test]
    fn overrides_take_precedence() {
        let settings = Settings::default().apply(SettingsOverrides {
            logserver_url: Some(String::new()),
            manifest_directory: Some(PathBuf::from("/tmp/manifests")),
            ..Default::default()
        });

        assert_eq!(settings.logserver_url, "");
        assert_eq!(settings.manifest_directory, PathBuf::from("/tmp/manifests"));
        assert_eq!(settings.acquisition_dir, Settings::default().acquisition_dir);
    }

    #[test]
    fn env_overrides_are_read_with_prefix() {
        let env = HashMap::from([
            (
                "MESO_PREPARE_TRANSFER__ACQUISITION_DIR".to_string(),
                "/mnt/acq".to_string(),
            ),
            ("UNRELATED".to_string(), "x".to_string()),
        ]);
        let source = config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .source(Some(env));

        let overrides = SettingsOverrides::from_env_source(source).unwrap();
        assert_eq!(overrides.acquisition_dir, Some(PathBuf::from("/mnt/acq")));
        assert_eq!(overrides.logserver_url, None);
    }

    #[test]
    fn cli_overrides_win_over_env() {
        let env = SettingsOverrides {
            acquisition_dir: Some(PathBuf::from("/env")),
            logserver_url: Some("env:1".to_string()),
            ..Default::default()
        };
        let cli = SettingsOverrides {
            acquisition_dir: Some(PathBuf::from("/cli")),
            ..Default::default()
        };

        let merged = env.merge(cli);
        assert_eq!(merged.acquisition_dir, Some(PathBuf::from("/cli")));
        assert_eq!(merged.logserver_url, Some("env:1".to_string()));
    }
}
