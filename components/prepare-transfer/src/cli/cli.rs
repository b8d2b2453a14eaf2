// Local crates
use crate::{
    helpers::{
        app_dirs::{APP_NAME, APP_VERSION, RigIdentity, data_dir, log_dir},
        load_config::SettingsOverrides,
        source_config::{config_server_url, write_config_to_server},
    },
    instrumentation::tracing::{init_panic_handler, init_tracing},
    runtime::runtime::{self, RunOptions, SessionRequest},
    shipper::record::LogServerIdentity,
    sync::sync::AcquisitionWindow,
};

// External crates
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "meso-prepare-transfer",
    version,
    about = "Prepare a mesoscope session for transfer off-rig",
    subcommand_negates_reqs = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Full name of the operator
    #[arg(long, required = true)]
    username: Option<String>,

    /// Session (acquisition directory) to prepare
    #[arg(long, required = true)]
    session_id: Option<String>,

    /// Acquisition start, e.g. 2025-06-15T12:00:00 (skips the sync file)
    #[arg(long, value_parser = parse_datetime, requires = "end_time")]
    start_time: Option<NaiveDateTime>,

    /// Acquisition end, e.g. 2025-06-15T13:00:00 (skips the sync file)
    #[arg(long, value_parser = parse_datetime, requires = "start_time")]
    end_time: Option<NaiveDateTime>,

    #[command(flatten)]
    settings: SettingsArgs,
}

/// Settings that can be set on the command line, over the served config.
#[derive(Debug, Clone, Args)]
struct SettingsArgs {
    /// Parent directory of the session acquisition directories
    #[arg(long, global = true)]
    acquisition_dir: Option<PathBuf>,

    /// Directory holding the behavior videos
    #[arg(long, global = true)]
    behavior_video_dir: Option<PathBuf>,

    /// Directory watched by the watchdog service
    #[arg(long, global = true)]
    manifest_directory: Option<PathBuf>,

    /// Log server as host:port, empty to disable
    #[arg(long, global = true)]
    logserver_url: Option<String>,

    /// Configuration server base URL
    #[arg(long, global = true, env = "ALLENINST_CONFIG_API_URL")]
    config_url: Option<String>,

    /// Use the cached configuration without contacting the server
    #[arg(long, global = true)]
    offline: bool,
}

impl From<SettingsArgs> for SettingsOverrides {
    fn from(args: SettingsArgs) -> Self {
        Self {
            logserver_url: args.logserver_url,
            acquisition_dir: args.acquisition_dir,
            behavior_video_dir: args.behavior_video_dir,
            manifest_directory: args.manifest_directory,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the resolved configuration as JSON
    ShowConfig,

    /// Publish a configuration document for this rig to the configuration server
    PushConfig {
        #[arg(short, long)]
        file: PathBuf,
    },
}

fn parse_datetime(value: &str) -> Result<NaiveDateTime, String> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .ok_or_else(|| format!("invalid datetime {value:?}, expected YYYY-MM-DDTHH:MM:SS"))
}

/// Entry function for CLI
pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let data_dir = data_dir().context("Failed to create the application data directory")?;
    let rig = RigIdentity::from_env();
    let guards = init_tracing(
        &log_dir(&data_dir),
        LogServerIdentity {
            project_name: APP_NAME.to_string(),
            version: APP_VERSION.to_string(),
            rig_id: rig.rig_id.clone(),
            comp_id: rig.comp_id.clone(),
        },
    )?;
    init_panic_handler();

    let config_url = cli.settings.config_url.clone();
    let offline = cli.settings.offline;
    let overrides = SettingsOverrides::from(cli.settings);
    let env_overrides = match SettingsOverrides::from_env() {
        Ok(env_overrides) => env_overrides,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Invalid environment overrides");
            guards.log_server.disable();
            return Err(e);
        }
    };

    match cli.command {
        Some(Commands::ShowConfig) => {
            guards.log_server.disable();
            let settings = runtime::resolve_settings(
                config_url.as_deref(),
                offline,
                env_overrides,
                overrides,
                &data_dir,
                &rig,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::PushConfig { file }) => {
            guards.log_server.disable();
            push_config(config_url, file, &rig).await?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            let (Some(username), Some(session_id)) = (cli.username, cli.session_id) else {
                anyhow::bail!("--username and --session-id are required");
            };
            let window = match (cli.start_time, cli.end_time) {
                (Some(start), Some(end)) => Some(AcquisitionWindow { start, end }),
                _ => None,
            };

            let options = RunOptions {
                request: SessionRequest {
                    username,
                    session_id,
                },
                env_overrides,
                overrides,
                config_url,
                offline,
                window,
            };
            runtime::run_prepare_transfer(options, &guards.log_server, &data_dir, &rig).await
        }
    }
}

//
// ------------------------ Command Implementations ------------------------------
//

/// Send a JSON config document to the configuration server.
async fn push_config(config_url: Option<String>, file: PathBuf, rig: &RigIdentity) -> Result<()> {
    let body = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read config document {}", file.display()))?;
    let document: serde_json::Value = serde_json::from_str(&body)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    // Refuse documents the tool itself could not load.
    crate::helpers::load_config::Settings::from_json_str(&body)?;

    let url = config_url.unwrap_or_else(config_server_url);
    write_config_to_server(&url, APP_NAME, &rig.comp_id, &document).await?;
    Ok(())
}
