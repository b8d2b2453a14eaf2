//! `meso-prepare-transfer` binary.

use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    meso_prepare_transfer::cli::cli::run().await
}
