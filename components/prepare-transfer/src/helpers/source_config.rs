//! Configuration server client.
//!
//! The configuration server is a key-value service keyed by application name
//! and rig. Every successful fetch is cached on disk so the tool keeps working
//! when the server is unreachable; a changed response backs up the previous
//! cache before overwriting it.

// Local crates
use crate::helpers::load_config::Settings;

// External crates
use chrono::Local;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::instrument;

/// Configuration server used when `ALLENINST_CONFIG_API_URL` is unset.
pub const DEFAULT_CONFIG_SERVER_URL: &str = "http://eng-tools:8888/api/v1beta/configs/projects/";
/// Environment variable naming the configuration server.
pub const CONFIG_SERVER_URL_ENV: &str = "ALLENINST_CONFIG_API_URL";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors talking to the configuration server or its local cache.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The server could not be used and there is no cache to fall back to.
    #[error("no configuration from {url} and no cached copy at {cache_file:?}")]
    Unavailable { url: String, cache_file: PathBuf },
    /// Reading or writing the cache failed.
    #[error("failed to cache configuration at {path:?}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The HTTP request failed.
    #[error("config server request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The server answered a push with a non-success status.
    #[error("config server rejected the update with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Base URL of the configuration server, `ALLENINST_CONFIG_API_URL` if set.
pub fn config_server_url() -> String {
    env::var(CONFIG_SERVER_URL_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_SERVER_URL.to_string())
}

fn endpoint(config_server_url: &str, app_name: &str) -> String {
    format!("{config_server_url}{app_name}")
}

fn http_client() -> Result<reqwest::Client, ConfigError> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// Fetch the application config for `rig_name` and cache it locally.
///
/// Returns the cache file path. A failed request is logged and the existing
/// cache is used; it is only an error when no cache exists either.
#[instrument(
    name = "config_server::fetch",
    target = "helpers::source_config",
    skip_all,
    level = "debug"
)]
pub async fn fetch_config_from_server(
    config_server_url: &str,
    app_name: &str,
    rig_name: &str,
    cache_file: &Path,
) -> Result<PathBuf, ConfigError> {
    let url = endpoint(config_server_url, app_name);

    let response = http_client()?
        .get(&url)
        .query(&[("rig_name", rig_name)])
        .send()
        .await;

    match response {
        Ok(resp) if resp.status() == reqwest::StatusCode::OK => match resp.text().await {
            Ok(body) => {
                tracing::info!(
                    config_server = %config_server_url,
                    rig_name = %rig_name,
                    "Fetched config from server"
                );
                cache_data(&body, cache_file)?;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    config_server = %config_server_url,
                    rig_name = %rig_name,
                    cache_file = %cache_file.display(),
                    "Config server response interrupted, using cached config if available"
                );
            }
        },
        Ok(resp) => {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(
                config_server = %config_server_url,
                rig_name = %rig_name,
                status,
                response = %body,
                cache_file = %cache_file.display(),
                "Failed to fetch config from server, using cached config if available"
            );
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                config_server = %config_server_url,
                rig_name = %rig_name,
                cache_file = %cache_file.display(),
                "Config server unreachable, using cached config if available"
            );
        }
    }

    if !cache_file.is_file() {
        return Err(ConfigError::Unavailable {
            url,
            cache_file: cache_file.to_path_buf(),
        });
    }

    Ok(cache_file.to_path_buf())
}

/// Write `data` to `cache_file`, keeping a timestamped backup of a previous,
/// different cache.
pub fn cache_data(data: &str, cache_file: &Path) -> Result<(), ConfigError> {
    let cache_err = |source| ConfigError::Cache {
        path: cache_file.to_path_buf(),
        source,
    };

    if let Some(parent) = cache_file.parent() {
        fs::create_dir_all(parent).map_err(cache_err)?;
    }

    if cache_file.exists() {
        let previous = fs::read_to_string(cache_file).map_err(cache_err)?;
        if previous == data {
            return Ok(());
        }

        let backup = backup_path(cache_file, &Local::now().format("%y%m%d-%H%M%S").to_string());
        tracing::debug!(backup = %backup.display(), "Backing up previous configuration");
        fs::copy(cache_file, &backup).map_err(cache_err)?;
    }

    fs::write(cache_file, data).map_err(cache_err)
}

fn backup_path(cache_file: &Path, timestamp: &str) -> PathBuf {
    let mut name = cache_file.as_os_str().to_os_string();
    name.push(format!(".{timestamp}.bck"));
    PathBuf::from(name)
}

/// Publish a config document for `rig_name`.
#[instrument(
    name = "config_server::write",
    target = "helpers::source_config",
    skip_all,
    level = "debug"
)]
pub async fn write_config_to_server(
    config_server_url: &str,
    app_name: &str,
    rig_name: &str,
    data: &serde_json::Value,
) -> Result<(), ConfigError> {
    let url = endpoint(config_server_url, app_name);
    let payload = serde_json::json!({ "rig_name": rig_name, "config": data });

    let resp = http_client()?.post(&url).json(&payload).send().await?;

    let status = resp.status();
    if status == reqwest::StatusCode::OK {
        tracing::info!(
            config_server = %config_server_url,
            rig_name = %rig_name,
            "Wrote config to server"
        );
        return Ok(());
    }

    let body = resp.text().await.unwrap_or_default();
    tracing::warn!(
        config_server = %config_server_url,
        rig_name = %rig_name,
        status = status.as_u16(),
        response = %body,
        "Failed to write config to server"
    );
    Err(ConfigError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// Fetch the config from the server (or cache) and parse it into [`Settings`].
pub async fn get_config(
    config_server_url: &str,
    app_name: &str,
    rig_name: &str,
    cache_file: &Path,
) -> anyhow::Result<Settings> {
    let path = fetch_config_from_server(config_server_url, app_name, rig_name, cache_file).await?;
    Settings::load(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_name_appends_timestamp() {
        let backup = backup_path(Path::new("/cfg/config_server_response.json"), "250101-120000");
        assert_eq!(
            backup,
            PathBuf::from("/cfg/config_server_response.json.250101-120000.bck")
        );
    }

    #[test]
    fn endpoint_appends_app_name() {
        assert_eq!(
            endpoint(DEFAULT_CONFIG_SERVER_URL, "meso_prepare_transfer"),
            "http://eng-tools:8888/api/v1beta/configs/projects/meso_prepare_transfer"
        );
    }

    #[test]
    fn identical_data_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("config").join("response.json");

        cache_data(r#"{"a": 1}"#, &cache).unwrap();
        cache_data(r#"{"a": 1}"#, &cache).unwrap();

        let entries = fs::read_dir(cache.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn changed_data_backs_up_previous_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("response.json");

        cache_data("old", &cache).unwrap();
        cache_data("new", &cache).unwrap();

        assert_eq!(fs::read_to_string(&cache).unwrap(), "new");
        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".bck"))
            .collect();
        assert_eq!(backups.len(), 1);
        assert!(backups[0].starts_with("response.json."));
        assert_eq!(
            fs::read_to_string(dir.path().join(&backups[0])).unwrap(),
            "old"
        );
    }
}
