//! Transfer manifest for the watchdog service.
//!
//! The watchdog service polls its manifest directory and moves whatever a
//! manifest lists to the configured destination at `schedule_time`. One
//! manifest is written per session.

// Local crates
use crate::{
    helpers::load_config::Settings,
    manifest::search::search_files,
    schema::models::{Modality, NAME_DATETIME_FORMAT},
};

// External crates
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Errors generating or writing a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// A modality glob is not a valid pattern.
    #[error("invalid search pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    /// Searching or writing a file failed.
    #[error("failed to write manifest {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Serializing the manifest failed.
    #[error("failed to serialize manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A watchdog manifest as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Dataset name, see [`manifest_name`].
    pub name: String,
    /// Operator who ran the tool.
    pub processor_full_name: String,
    /// Subject of the session.
    pub subject_id: String,
    /// Start of acquisition.
    pub acquisition_datetime: NaiveDateTime,
    /// Time of day to start the transfer, immediately when unset.
    pub schedule_time: Option<String>,
    /// Upload even if the dataset already exists in the cloud.
    pub force_cloud_sync: bool,
    /// Transfer service endpoint, the service default when unset.
    pub transfer_endpoint: Option<String>,
    /// Platform abbreviation.
    pub platform: String,
    /// Processing capsule to trigger after upload.
    pub capsule_id: Option<String>,
    /// Mount point of the processing capsule.
    pub mount: Option<String>,
    /// Bucket the dataset is uploaded to.
    pub s3_bucket: String,
    /// Data-schema project name.
    pub project_name: String,
    /// Destination share of the transfer.
    pub destination: String,
    /// Files to transfer, keyed by modality abbreviation.
    pub modalities: BTreeMap<String, Vec<String>>,
    /// Metadata files shipped with the data.
    pub schemas: Vec<String>,
    /// Per-modality compression scripts; the rig uses none.
    pub script: BTreeMap<String, Vec<String>>,
    /// Identifies the session to the transfer service (`ophys_session_id`).
    pub extra_identifying_info: BTreeMap<String, String>,
    /// Job type the transfer service runs after upload.
    pub transfer_service_job_type: String,
    /// Remove the rig copy once the upload succeeded.
    pub delete_modalities_source_after_success: bool,
}

impl ManifestConfig {
    /// `manifest_<name>.yml`
    pub fn file_name(&self) -> String {
        format!("manifest_{}.yml", self.name)
    }

    /// Write the manifest into `output_directory`, returning its path.
    pub fn write_standard_file(&self, output_directory: &Path) -> Result<PathBuf, ManifestError> {
        let path = output_directory.join(self.file_name());
        let io_err = |source| ManifestError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(output_directory).map_err(io_err)?;
        let body = serde_yaml::to_string(self)?;
        fs::write(&path, body).map_err(io_err)?;
        Ok(path)
    }
}

/// `<platform>_<subject>_<YYYY-MM-DD_HH-MM-SS>`
pub fn manifest_name(platform: &str, subject_id: &str, acquired: NaiveDateTime) -> String {
    format!(
        "{platform}_{subject_id}_{}",
        acquired.format(NAME_DATETIME_FORMAT)
    )
}

/// Schema files to ship: existing files as given, everything else resolved
/// against the session directory.
pub fn resolve_schemas(schemas: &[String], data_directory: &Path) -> Vec<String> {
    schemas
        .iter()
        .map(|schema| {
            if Path::new(schema).is_file() {
                schema.clone()
            } else {
                data_directory.join(schema).to_string_lossy().into_owned()
            }
        })
        .collect()
}

/// Files per modality. Behavior videos live in the shared video directory and
/// are narrowed to this session by its directory name.
pub fn collect_modalities(
    data_directory: &Path,
    settings: &Settings,
) -> Result<BTreeMap<String, Vec<String>>, ManifestError> {
    let session_key = data_directory
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut modalities = BTreeMap::new();
    for (modality, patterns) in &settings.modalities {
        let files = match Modality::from_abbreviation(modality) {
            Some(Modality::BehaviorVideos) => {
                search_files(&settings.behavior_video_dir, patterns, &session_key)?
            }
            _ => search_files(data_directory, patterns, "")?,
        };

        tracing::debug!(modality = %modality, files = files.len(), "Collected files for modality");
        modalities.insert(modality.clone(), files);
    }
    Ok(modalities)
}

/// Build and write the watchdog manifest for one session.
#[instrument(
    name = "manifest::generate",
    target = "manifest::manifest",
    skip_all,
    level = "debug"
)]
pub fn generate_watchdog_manifest(
    session_id: &str,
    subject_id: &str,
    project_name: &str,
    user_full_name: &str,
    start_time: NaiveDateTime,
    settings: &Settings,
) -> Result<PathBuf, ManifestError> {
    tracing::info!("Generating manifest file");
    let data_directory = settings.session_directory(session_id);
    let kwargs = &settings.watchdog_manifest_kwargs;

    let manifest = ManifestConfig {
        name: manifest_name(&kwargs.platform, subject_id, start_time),
        processor_full_name: user_full_name.to_string(),
        subject_id: subject_id.to_string(),
        acquisition_datetime: start_time,
        schedule_time: kwargs.schedule_time.clone(),
        force_cloud_sync: kwargs.force_cloud_sync,
        transfer_endpoint: kwargs.transfer_endpoint.clone(),
        platform: kwargs.platform.clone(),
        capsule_id: kwargs.capsule_id.clone(),
        mount: kwargs.mount.clone(),
        s3_bucket: kwargs.s3_bucket.clone(),
        project_name: project_name.to_string(),
        destination: kwargs.destination.clone(),
        modalities: collect_modalities(&data_directory, settings)?,
        schemas: resolve_schemas(&settings.schemas, &data_directory),
        script: BTreeMap::new(),
        extra_identifying_info: BTreeMap::from([(
            "ophys_session_id".to_string(),
            session_id.to_string(),
        )]),
        transfer_service_job_type: kwargs.transfer_service_job_type.clone(),
        delete_modalities_source_after_success: kwargs.delete_modalities_source_after_success,
    };

    let path = manifest.write_standard_file(&settings.manifest_directory)?;
    tracing::info!(manifest = %path.display(), "Manifest written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn name_uses_platform_subject_and_time() {
        let t = NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(
            manifest_name("multiplane-ophys", "614173", t),
            "multiplane-ophys_614173_2023-01-01_12-00-00"
        );
    }

    #[test]
    fn existing_schema_files_are_kept_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let rig = dir.path().join("rig.json");
        fs::write(&rig, "{}").unwrap();
        let session_dir = dir.path().join("20000001");

        let schemas = vec![rig.to_string_lossy().into_owned(), "session.json".to_string()];
        let resolved = resolve_schemas(&schemas, &session_dir);

        assert_eq!(resolved[0], rig.to_string_lossy());
        assert_eq!(PathBuf::from(&resolved[1]), session_dir.join("session.json"));
    }

    #[test]
    fn manifest_round_trips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ManifestConfig {
            name: "multiplane-ophys_1_2023-01-01_12-00-00".to_string(),
            processor_full_name: "User Name".to_string(),
            subject_id: "1".to_string(),
            acquisition_datetime: NaiveDate::from_ymd_opt(2023, 1, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            schedule_time: Some("03:00:00".to_string()),
            force_cloud_sync: false,
            transfer_endpoint: None,
            platform: "multiplane-ophys".to_string(),
            capsule_id: None,
            mount: None,
            s3_bucket: "private".to_string(),
            project_name: "OpenScope".to_string(),
            destination: "//share".to_string(),
            modalities: BTreeMap::from([("pophys".to_string(), vec!["/a.tif".to_string()])]),
            schemas: vec!["/s/session.json".to_string()],
            script: BTreeMap::new(),
            extra_identifying_info: BTreeMap::from([(
                "ophys_session_id".to_string(),
                "1".to_string(),
            )]),
            transfer_service_job_type: "default".to_string(),
            delete_modalities_source_after_success: false,
        };

        let path = manifest.write_standard_file(&dir.path().join("manifests")).unwrap();
        assert!(path.ends_with("manifest_multiplane-ophys_1_2023-01-01_12-00-00.yml"));

        let parsed: ManifestConfig =
            serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, manifest);
    }
}
