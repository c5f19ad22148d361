//! Configuration command handlers

use crate::cli::commands::ConfigAction;
use crate::error::{CliError, Result};
use crate::output::{compress_path, print_info, print_success};
use campaign_sdk::{ConfigLoader, SdkConfig};
use std::fs;
use std::path::PathBuf;

pub fn handle_config(action: ConfigAction, config_path: Option<PathBuf>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = SdkConfig::load(config_path)?;
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| CliError::Usage(format!("Failed to render configuration: {e}")))?;
            print!("{rendered}");
            Ok(())
        }
        ConfigAction::Init { force } => {
            let path = resolve_path(config_path)?;
            write_example(&path, force)?;
            print_success(&format!("Wrote {}", compress_path(&path)));
            Ok(())
        }
        ConfigAction::Path => {
            let config = SdkConfig::load(config_path.clone())?;
            print_info(&format!(
                "config:      {}",
                compress_path(&resolve_path(config_path)?)
            ));
            print_info(&format!(
                "credentials: {}",
                compress_path(&config.credentials_path()?)
            ));
            Ok(())
        }
    }
}

fn resolve_path(config_path: Option<PathBuf>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path),
        None => Ok(SdkConfig::default_config_path()?),
    }
}

fn write_example(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(CliError::Usage(format!(
            "{} already exists; pass --force to overwrite",
            compress_path(path)
        )));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, SdkConfig::generate_example()?)?;
    Ok(())
}
