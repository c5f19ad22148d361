//! Main entry point for the Campaign Hub CLI

use campaign_cli::cli::Args;
use clap::Parser;
use color_eyre::eyre::{eyre, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Disable location display (file paths and line numbers)
    color_eyre::config::HookBuilder::default()
        .display_location_section(false)
        .display_env_section(false)
        .install()?;

    // Silent unless -v or RUST_LOG asks for output
    let binary_name = env!("CARGO_BIN_NAME").replace('-', "_");
    let default_filter = format!("{binary_name}=warn,campaign_sdk=warn");
    campaign_common::logging::init_cli_logging(&args.verbosity, &default_filter, args.log_format())
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

    Ok(args.run().await?)
}
