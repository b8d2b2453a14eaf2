//! `session.json` for a mesoscope acquisition.

// Local crates
use crate::schema::{
    SchemaError, write_json,
    models::{AIND_SCHEMA_URL, Modality, NamedTerm},
};

// External crates
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the session metadata.
pub const SESSION_FILE: &str = "session.json";
const SCHEMA_VERSION: &str = "1.0.0";

/// Acquisition session metadata, written as `session.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Schema source URL.
    #[serde(rename = "describedBy")]
    pub described_by: String,
    /// Version of the schema the file follows.
    pub schema_version: String,
    /// Protocols followed; none recorded on this rig.
    pub protocol_id: Vec<String>,
    /// Operator who ran the session.
    pub experimenter_full_name: Vec<String>,
    /// Start of acquisition.
    pub session_start_time: NaiveDateTime,
    /// End of acquisition.
    pub session_end_time: NaiveDateTime,
    /// Session type, always `Mesoscope`.
    pub session_type: String,
    /// Rig the session ran on.
    pub rig_id: String,
    /// Mouse identifier.
    pub subject_id: String,
    /// Mouse platform, always `disc`.
    pub mouse_platform_name: String,
    /// Whether the mouse could move the platform.
    pub active_mouse_platform: bool,
    /// A single stream covering the whole acquisition.
    pub data_streams: Vec<Stream>,
    /// Stimulus epochs; none recorded by this tool.
    pub stimulus_epochs: Vec<serde_json::Value>,
    /// Carries `ophys_session_id=<session>`.
    pub notes: Option<String>,
}

/// One data stream of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    /// Start of the stream.
    pub stream_start_time: NaiveDateTime,
    /// End of the stream.
    pub stream_end_time: NaiveDateTime,
    /// Behavior cameras, from the video metadata file names.
    pub camera_names: Vec<String>,
    /// Modalities recorded in the stream.
    pub stream_modalities: Vec<NamedTerm>,
    /// Free-form notes.
    pub notes: Option<String>,
}

/// Inputs that vary per session.
#[derive(Debug, Clone)]
pub struct SessionInput<'a> {
    /// Acquisition directory name.
    pub session_id: &'a str,
    /// Operator full name.
    pub experimenter: &'a str,
    /// Mouse identifier.
    pub subject_id: &'a str,
    /// Rig the session ran on.
    pub rig_id: &'a str,
    /// Start of acquisition.
    pub start: NaiveDateTime,
    /// End of acquisition.
    pub end: NaiveDateTime,
    /// Behavior camera names.
    pub camera_names: Vec<String>,
}

impl Session {
    /// Mesoscope session with one stream covering the acquisition.
    pub fn new_mesoscope(input: SessionInput<'_>) -> Self {
        let stream = Stream {
            stream_start_time: input.start,
            stream_end_time: input.end,
            camera_names: input.camera_names,
            stream_modalities: [Modality::Pophys, Modality::BehaviorVideos]
                .into_iter()
                .map(NamedTerm::from)
                .collect(),
            notes: None,
        };

        Self {
            described_by: format!("{AIND_SCHEMA_URL}/session.py"),
            schema_version: SCHEMA_VERSION.to_string(),
            protocol_id: Vec::new(),
            experimenter_full_name: vec![input.experimenter.to_string()],
            session_start_time: input.start,
            session_end_time: input.end,
            session_type: "Mesoscope".to_string(),
            rig_id: input.rig_id.to_string(),
            subject_id: input.subject_id.to_string(),
            mouse_platform_name: "disc".to_string(),
            active_mouse_platform: false,
            data_streams: vec![stream],
            stimulus_epochs: Vec::new(),
            notes: Some(format!("ophys_session_id={}", input.session_id)),
        }
    }

    /// Start before end and a non-empty experimenter.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.session_end_time < self.session_start_time {
            return Err(SchemaError::Invalid {
                file: SESSION_FILE,
                reason: "session ends before it starts".to_string(),
            });
        }
        if self.subject_id.trim().is_empty() {
            return Err(SchemaError::Invalid {
                file: SESSION_FILE,
                reason: "subject_id is empty".to_string(),
            });
        }
        Ok(())
    }

    /// Write `session.json` into `output_directory`.
    pub fn write_standard_file(&self, output_directory: &Path) -> Result<PathBuf, SchemaError> {
        self.validate()?;
        let path = output_directory.join(SESSION_FILE);
        write_json(self, &path)?;
        Ok(path)
    }
}

/// Camera name from a behavior video metadata file name such as
/// `1234567890_Face_20250615T120000.json`.
pub fn camera_name(session_id: &str, file_name: &str) -> Option<String> {
    let rest = file_name.strip_prefix(session_id)?.strip_prefix('_')?;
    let name = rest.split(['_', '.']).next()?;
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn input(start: NaiveDateTime, end: NaiveDateTime) -> SessionInput<'static> {
        SessionInput {
            session_id: "20000001",
            experimenter: "User Name",
            subject_id: "614173",
            rig_id: "MESO.2",
            start,
            end,
            camera_names: vec!["Behavior".to_string(), "Eye".to_string()],
        }
    }

    #[test]
    fn camera_names_come_from_file_names() {
        assert_eq!(
            camera_name("20000001", "20000001_Face_20250615T120000.json"),
            Some("Face".to_string())
        );
        assert_eq!(camera_name("20000001", "19000001_Face_20250615T120000.json"), None);
        assert_eq!(camera_name("20000001", "20000001.json"), None);
    }

    #[test]
    fn session_carries_one_stream() {
        let session = Session::new_mesoscope(input(at(12), at(13)));
        assert_eq!(session.data_streams.len(), 1);
        assert_eq!(session.data_streams[0].camera_names, vec!["Behavior", "Eye"]);
        assert_eq!(session.experimenter_full_name, vec!["User Name"]);
        assert!(session.validate().is_ok());
    }

    #[test]
    fn reversed_window_is_rejected() {
        let session = Session::new_mesoscope(input(at(13), at(12)));
        assert!(matches!(session.validate(), Err(SchemaError::Invalid { .. })));
    }
}
