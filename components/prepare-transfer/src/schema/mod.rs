/// `data_description.json` and its CSV flattening.
pub mod data_description;
/// Controlled vocabularies.
pub mod models;
/// `session.json`.
pub mod session;

// External crates
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Failure to build, validate or write a metadata file.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A constraint of the metadata schema does not hold.
    #[error("{file} failed validation: {reason}")]
    Invalid { file: &'static str, reason: String },
    /// Writing the file failed.
    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Serializing or parsing JSON failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Writing the CSV failed.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Pretty-printed JSON, the layout metadata readers expect.
pub(crate) fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), SchemaError> {
    let mut body = serde_json::to_string_pretty(value)?;
    body.push('\n');
    fs::write(path, body).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })
}
