//! `data_description.json` and its flat CSV rendering.

// Local crates
use crate::schema::{
    SchemaError, write_json,
    models::{
        AIND_SCHEMA_URL, Funding, Modality, NAME_DATETIME_FORMAT, NamedTerm, Organization,
        PidName, Platform,
    },
};

// External crates
use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// File name of the JSON description.
pub const DATA_DESCRIPTION_FILE: &str = "data_description.json";
/// File name of the flattened CSV.
pub const DATA_DESCRIPTION_CSV_FILE: &str = "data_description.csv";
const SCHEMA_VERSION: &str = "1.0.0";

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9-]+_[^_]+_\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}$")
        .unwrap_or_else(|e| unreachable!("static dataset name pattern: {e}"))
});

/// Description of a raw (unprocessed) dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataDescription {
    /// Schema source URL.
    #[serde(rename = "describedBy")]
    pub described_by: String,
    /// Version of the schema the file follows.
    pub schema_version: String,
    /// Always `CC-BY-4.0`.
    pub license: String,
    /// Acquisition platform.
    pub platform: NamedTerm,
    /// Mouse identifier.
    pub subject_id: String,
    /// Start of acquisition.
    pub creation_time: NaiveDateTime,
    /// Free-form label, unset for raw data.
    pub label: Option<String>,
    /// `<platform>_<subject>_<YYYY-MM-DD_HH-MM-SS>`, see [`dataset_name`].
    pub name: String,
    /// Institution that acquired the data.
    pub institution: NamedTerm,
    /// At least one funding source.
    pub funding_source: Vec<Funding>,
    /// Always `raw`.
    pub data_level: String,
    /// Research group, unset on this rig.
    pub group: Option<String>,
    /// Must not be empty.
    pub investigators: Vec<PidName>,
    /// Data-schema project name.
    pub project_name: Option<String>,
    /// Data use restrictions, unset on this rig.
    pub restrictions: Option<String>,
    /// Modalities in the dataset.
    pub modality: Vec<NamedTerm>,
    /// Links to other datasets; always empty for raw data.
    pub related_data: Vec<serde_json::Value>,
    /// Free-form summary of the dataset.
    pub data_summary: Option<String>,
}

/// Inputs that vary per session.
#[derive(Debug, Clone)]
pub struct DataDescriptionInput<'a> {
    /// Mouse identifier.
    pub subject_id: &'a str,
    /// Start of acquisition.
    pub creation_time: NaiveDateTime,
    /// Data-schema project name.
    pub project_name: &'a str,
    /// Full names, in the order the settings list them.
    pub investigators: &'a [String],
    /// Free-form summary of the dataset.
    pub data_summary: &'a str,
}

impl RawDataDescription {
    /// Raw multiplane-ophys description funded by AIND.
    pub fn new_mesoscope(input: DataDescriptionInput<'_>) -> Self {
        let platform = Platform::MultiplaneOphys;
        Self {
            described_by: format!("{AIND_SCHEMA_URL}/data_description.py"),
            schema_version: SCHEMA_VERSION.to_string(),
            license: "CC-BY-4.0".to_string(),
            platform: platform.into(),
            subject_id: input.subject_id.to_string(),
            creation_time: input.creation_time,
            label: None,
            name: dataset_name(platform, input.subject_id, input.creation_time),
            institution: Organization::Aind.into(),
            funding_source: vec![Funding::from_funder(Organization::Ai)],
            data_level: "raw".to_string(),
            group: None,
            investigators: input.investigators.iter().map(PidName::new).collect(),
            project_name: Some(input.project_name.to_string()),
            restrictions: None,
            modality: [Modality::Pophys, Modality::BehaviorVideos, Modality::Behavior]
                .into_iter()
                .map(NamedTerm::from)
                .collect(),
            related_data: Vec::new(),
            data_summary: Some(input.data_summary.to_string()),
        }
    }

    /// Check the constraints the downstream schema validator enforces.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |reason: &str| {
            Err(SchemaError::Invalid {
                file: DATA_DESCRIPTION_FILE,
                reason: reason.to_string(),
            })
        };

        if self.subject_id.trim().is_empty() {
            return invalid("subject_id is empty");
        }
        if self.subject_id.contains('_') {
            return invalid("subject_id must not contain '_'");
        }
        if !NAME_RE.is_match(&self.name) {
            return invalid("name does not follow <platform>_<subject>_<datetime>");
        }
        if self.investigators.is_empty() {
            return invalid("at least one investigator is required");
        }
        if self.modality.is_empty() {
            return invalid("at least one modality is required");
        }
        if self.funding_source.is_empty() {
            return invalid("at least one funding source is required");
        }
        Ok(())
    }

    /// Serialize, parse back and validate, so what lands on disk is exactly
    /// what a reader will accept.
    pub fn revalidated(&self) -> Result<Self, SchemaError> {
        let json = serde_json::to_string(self)?;
        let reparsed: RawDataDescription = serde_json::from_str(&json)?;
        reparsed.validate()?;
        Ok(reparsed)
    }

    /// Write `data_description.json` into `output_directory`.
    pub fn write_standard_file(&self, output_directory: &Path) -> Result<PathBuf, SchemaError> {
        let path = output_directory.join(DATA_DESCRIPTION_FILE);
        write_json(self, &path)?;
        Ok(path)
    }

    /// Write the one-row `data_description.csv` into `output_directory`.
    pub fn write_csv(&self, output_directory: &Path) -> Result<PathBuf, SchemaError> {
        let path = output_directory.join(DATA_DESCRIPTION_CSV_FILE);
        let file = File::create(&path).map_err(|source| SchemaError::Io {
            path: path.clone(),
            source,
        })?;

        let mut writer = csv::Writer::from_writer(file);
        writer.serialize(DataDescriptionRow::from(self))?;
        writer.flush().map_err(|source| SchemaError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(path)
    }
}

/// `<platform>_<subject>_<YYYY-MM-DD_HH-MM-SS>`
pub fn dataset_name(platform: Platform, subject_id: &str, creation_time: NaiveDateTime) -> String {
    format!(
        "{}_{}_{}",
        platform.abbreviation(),
        subject_id,
        creation_time.format(NAME_DATETIME_FORMAT)
    )
}

/// One CSV row; list-valued fields are joined with `;`.
#[derive(Debug, Serialize)]
struct DataDescriptionRow {
    name: String,
    subject_id: String,
    creation_time: String,
    platform: String,
    modality: String,
    institution: String,
    funding_source: String,
    investigators: String,
    project_name: String,
    data_level: String,
    license: String,
    data_summary: String,
    schema_version: String,
}

fn abbreviation_or_name(term: &NamedTerm) -> &str {
    term.abbreviation.as_deref().unwrap_or(&term.name)
}

impl From<&RawDataDescription> for DataDescriptionRow {
    fn from(d: &RawDataDescription) -> Self {
        let join = |items: Vec<&str>| items.join(";");
        Self {
            name: d.name.clone(),
            subject_id: d.subject_id.clone(),
            creation_time: d.creation_time.format("%Y-%m-%dT%H:%M:%S").to_string(),
            platform: abbreviation_or_name(&d.platform).to_string(),
            modality: join(d.modality.iter().map(abbreviation_or_name).collect()),
            institution: abbreviation_or_name(&d.institution).to_string(),
            funding_source: join(d.funding_source.iter().map(|f| f.funder.name.as_str()).collect()),
            investigators: join(d.investigators.iter().map(|p| p.name.as_str()).collect()),
            project_name: d.project_name.clone().unwrap_or_default(),
            data_level: d.data_level.clone(),
            license: d.license.clone(),
            data_summary: d.data_summary.clone().unwrap_or_default(),
            schema_version: d.schema_version.clone(),
        }
    }
}
